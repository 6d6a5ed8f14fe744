//! FTP sessions over `suppaftp`.

use std::io::{self, Cursor};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};

use super::{Connector, Remote, TransferError};
use crate::config::FtpCredentials;

const DEFAULT_PORT: u16 = 21;
const TIMEOUT: Duration = Duration::from_secs(30);

/// Requested action not taken: file unavailable (also "directory exists" for MKD).
const FILE_UNAVAILABLE: u32 = 550;

/// An authenticated session in binary mode.
pub struct FtpSession {
    stream: FtpStream,
}

impl FtpSession {
    /// Connect and log in, switching to binary mode.
    pub fn open(credentials: &FtpCredentials) -> Result<Self, TransferError> {
        let host = &credentials.host;
        let connect_err = |source: io::Error| TransferError::Connect { host: host.clone(), source };

        let addr = resolve(host).map_err(connect_err)?;
        let mut stream = FtpStream::connect_timeout(addr, TIMEOUT).map_err(|e| match e {
            FtpError::ConnectionError(source) => connect_err(source),
            other => reply_error("connect", other),
        })?;
        stream.get_ref().set_read_timeout(Some(TIMEOUT))?;
        stream.get_ref().set_write_timeout(Some(TIMEOUT))?;

        stream.login(&credentials.user, &credentials.password).map_err(|e| match e {
            FtpError::UnexpectedResponse(response) => TransferError::Login {
                user: credentials.user.clone(),
                message: String::from_utf8_lossy(&response.body).trim().to_string(),
            },
            other => reply_error("USER", other),
        })?;
        stream.transfer_type(FileType::Binary).map_err(|e| reply_error("TYPE", e))?;

        tracing::debug!("connected to {}", host);
        Ok(Self { stream })
    }
}

/// Map a library error onto the command that caused it.
fn reply_error(command: &str, error: FtpError) -> TransferError {
    match error {
        FtpError::ConnectionError(e) => TransferError::Io(e),
        FtpError::UnexpectedResponse(response) => TransferError::Command {
            command: command.to_string(),
            code: response.status.code(),
            message: String::from_utf8_lossy(&response.body).trim().to_string(),
        },
        other => TransferError::Protocol(other.to_string()),
    }
}

fn is_unavailable(error: &FtpError) -> bool {
    matches!(error, FtpError::UnexpectedResponse(response) if response.status.code() == FILE_UNAVAILABLE)
}

fn resolve(host: &str) -> io::Result<SocketAddr> {
    let with_port = if host.contains(':') { host.to_string() } else { format!("{}:{}", host, DEFAULT_PORT) };
    with_port
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", host)))
}

impl Remote for FtpSession {
    fn mkdir(&mut self, path: &str) -> Result<(), TransferError> {
        match self.stream.mkdir(path) {
            Ok(()) => Ok(()),
            // Most servers answer 550 for an existing directory
            Err(e) if is_unavailable(&e) => Ok(()),
            Err(e) => Err(reply_error("MKD", e)),
        }
    }

    fn exists(&mut self, path: &str) -> Result<bool, TransferError> {
        match self.stream.size(path) {
            Ok(_) => Ok(true),
            Err(e) if is_unavailable(&e) => Ok(false),
            Err(e) => Err(reply_error("SIZE", e)),
        }
    }

    fn put(&mut self, path: &str, contents: &[u8]) -> Result<(), TransferError> {
        self.stream.put_file(path, &mut Cursor::new(contents)).map_err(|e| reply_error("STOR", e))?;
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), TransferError> {
        self.stream.rename(from, to).map_err(|e| reply_error("RNTO", e))
    }

    fn delete(&mut self, path: &str) -> Result<(), TransferError> {
        self.stream.rm(path).map_err(|e| reply_error("DELE", e))
    }

    fn quit(&mut self) -> Result<(), TransferError> {
        self.stream.quit().map_err(|e| reply_error("QUIT", e))
    }
}

/// Opens [`FtpSession`]s with fixed credentials.
#[derive(Debug, Clone)]
pub struct FtpConnector {
    credentials: FtpCredentials,
}

impl FtpConnector {
    pub fn new(credentials: FtpCredentials) -> Self {
        Self { credentials }
    }
}

impl Connector for FtpConnector {
    fn connect(&self) -> Result<Box<dyn Remote>, TransferError> {
        Ok(Box::new(FtpSession::open(&self.credentials)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread;

    type Store = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

    /// A scripted single-session server that stores uploads in memory.
    fn fake_server(store: Store) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut out = stream;
            let mut data_listener: Option<TcpListener> = None;
            let mut rename_from: Option<String> = None;
            write!(out, "220 fake ready\r\n").unwrap();

            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                let command = line.trim_end().to_string();
                line.clear();
                let (verb, arg) = command.split_once(' ').unwrap_or((command.as_str(), ""));
                let reply = match verb {
                    "USER" => "331 password please".to_string(),
                    "PASS" if arg == "secret" => "230 ok".to_string(),
                    "PASS" => "530 nope".to_string(),
                    "TYPE" => "200 binary".to_string(),
                    "MKD" if store.lock().unwrap().contains_key(arg) => "550 exists".to_string(),
                    "MKD" => {
                        store.lock().unwrap().insert(arg.to_string(), Vec::new());
                        format!("257 \"{}\" created", arg)
                    }
                    "SIZE" => match store.lock().unwrap().get(arg) {
                        Some(data) => format!("213 {}", data.len()),
                        None => "550 no such file".to_string(),
                    },
                    "PASV" => {
                        let l = TcpListener::bind("127.0.0.1:0").unwrap();
                        let port = l.local_addr().unwrap().port();
                        data_listener = Some(l);
                        format!("227 Entering Passive Mode (127,0,0,1,{},{})", port >> 8, port & 0xff)
                    }
                    "STOR" => {
                        write!(out, "150 go ahead\r\n").unwrap();
                        let (mut data, _) = data_listener.take().unwrap().accept().unwrap();
                        let mut contents = Vec::new();
                        data.read_to_end(&mut contents).unwrap();
                        store.lock().unwrap().insert(arg.to_string(), contents);
                        "226 done".to_string()
                    }
                    "RNFR" => {
                        rename_from = Some(arg.to_string());
                        "350 ready".to_string()
                    }
                    "RNTO" if arg.contains("locked") => "553 not allowed".to_string(),
                    "RNTO" => {
                        let mut files = store.lock().unwrap();
                        match rename_from.take().and_then(|from| files.remove(&from)) {
                            Some(data) => {
                                files.insert(arg.to_string(), data);
                                "250 renamed".to_string()
                            }
                            None => "550 no such file".to_string(),
                        }
                    }
                    "QUIT" => {
                        write!(out, "221 bye\r\n").unwrap();
                        break;
                    }
                    _ => "502 not implemented".to_string(),
                };
                write!(out, "{}\r\n", reply).unwrap();
            }
        });
        addr
    }

    fn credentials(addr: SocketAddr, password: &str) -> FtpCredentials {
        FtpCredentials {
            host: addr.to_string(),
            user: "deploy".into(),
            password: password.into(),
            path: "/www".into(),
            parallel: 1,
        }
    }

    #[test]
    fn test_session_uploads_and_renames() {
        let store: Store = Arc::default();
        let addr = fake_server(Arc::clone(&store));

        let mut session = FtpSession::open(&credentials(addr, "secret")).unwrap();
        session.mkdir("/www/css").unwrap();
        session.put("/www/css/.main.css.assetflow-part", b".a{color:red}").unwrap();
        assert!(session.exists("/www/css/.main.css.assetflow-part").unwrap());
        session.rename("/www/css/.main.css.assetflow-part", "/www/css/main.css").unwrap();
        assert!(!session.exists("/www/css/.main.css.assetflow-part").unwrap());
        session.quit().unwrap();

        let store = store.lock().unwrap();
        assert_eq!(store.get("/www/css/main.css").unwrap(), b".a{color:red}");
    }

    #[test]
    fn test_existing_directory_is_not_an_error() {
        let store: Store = Arc::default();
        let addr = fake_server(Arc::clone(&store));

        let mut session = FtpSession::open(&credentials(addr, "secret")).unwrap();
        session.mkdir("/www").unwrap();
        session.mkdir("/www").unwrap();
        session.quit().unwrap();
    }

    #[test]
    fn test_bad_password_is_login_error() {
        let addr = fake_server(Arc::default());
        let result = FtpSession::open(&credentials(addr, "wrong"));
        assert!(matches!(result, Err(TransferError::Login { ref user, .. }) if user == "deploy"));
    }

    #[test]
    fn test_rejected_rename_is_command_error() {
        let store: Store = Arc::default();
        let addr = fake_server(Arc::clone(&store));
        let mut session = FtpSession::open(&credentials(addr, "secret")).unwrap();
        session.put("/www/.a.html.assetflow-part", b"a").unwrap();

        let err = session.rename("/www/.a.html.assetflow-part", "/www/locked.html").unwrap_err();
        assert!(matches!(err, TransferError::Command { code: 553, .. }));
    }

    #[test]
    fn test_unreachable_host_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = FtpConnector::new(credentials(addr, "secret")).connect();
        assert!(matches!(result, Err(TransferError::Connect { .. })));
    }
}
