//! Site upload
//!
//! Uploads are staged under hidden names and only renamed into place once
//! every file has transferred. Files being replaced are first moved aside to
//! backups, so a failure while publishing can put the previous site back.

mod ftp;

pub use ftp::{FtpConnector, FtpSession};

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

use crate::build::{
    discover_files, format_duration, BuildContext, DiscoveryError, PatternSet, Reporter, SchedulerError, TaskError,
};
use crate::config::{ConfigError, DeployConfig, FtpCredentials};

/// Entry point run before uploading, when defined.
pub const DEPLOY_ENTRY: &str = "deploy";

/// Suffix of staged uploads.
pub const STAGING_SUFFIX: &str = ".assetflow-part";

/// Suffix of replaced remote files until the deploy completes.
pub const BACKUP_SUFFIX: &str = ".assetflow-old";

/// Error during deploy
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Cannot connect to {host}: {source}")]
    Connect { host: String, source: io::Error },
    #[error("Login rejected for '{user}': {message}")]
    Login { user: String, message: String },
    #[error("{command} failed with {code}: {message}")]
    Command { command: String, code: u32, message: String },
    #[error("Unexpected server reply: {0}")]
    Protocol(String),
    #[error("Connection error: {0}")]
    Io(#[from] io::Error),
    #[error("Cannot read {}: {source}", .path.display())]
    Local { path: PathBuf, source: io::Error },
    #[error("Upload of {path} failed: {source}")]
    Upload { path: String, source: Box<TransferError> },
    #[error(transparent)]
    Collect(#[from] DiscoveryError),
}

/// A file to upload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DeployFile {
    pub local: PathBuf,
    /// Path below the remote root, `/`-separated
    pub remote: String,
}

impl DeployFile {
    pub fn new(local: impl Into<PathBuf>, relative: &Path) -> Self {
        let remote = relative.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
        Self { local: local.into(), remote }
    }
}

/// Select the files under `root` that `[deploy]` includes.
pub fn collect_files(root: &Path, config: &DeployConfig) -> Result<Vec<DeployFile>, TransferError> {
    let excludes = PatternSet::new(&config.exclude)?;

    let mut files = BTreeSet::new();
    for pattern in &config.include {
        for file in discover_files(root, pattern)? {
            let relative = file.path.strip_prefix(root).unwrap_or(&file.path).to_path_buf();
            if !excludes.matches(&relative) {
                files.insert(DeployFile::new(&file.path, &relative));
            }
        }
    }
    Ok(files.into_iter().collect())
}

/// How and where to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOptions {
    /// Remote directory the site lands in
    pub remote_root: String,
    /// Maximum simultaneous upload connections
    pub parallel: usize,
}

impl DeployOptions {
    pub fn from_credentials(credentials: &FtpCredentials) -> Self {
        Self { remote_root: credentials.path.clone(), parallel: credentials.parallel }
    }

    /// Absolute remote path for a site-relative path.
    pub fn remote_path(&self, relative: &str) -> String {
        let root = self.remote_root.trim_end_matches('/');
        if relative.is_empty() {
            return if root.is_empty() { "/".to_string() } else { root.to_string() };
        }
        format!("{}/{}", root, relative)
    }
}

/// Opens remote sessions.
pub trait Connector: Sync {
    fn connect(&self) -> Result<Box<dyn Remote>, TransferError>;
}

/// One remote session. Paths are absolute and `/`-separated.
pub trait Remote: Send {
    /// Create a directory; an existing directory is not an error.
    fn mkdir(&mut self, path: &str) -> Result<(), TransferError>;
    /// Whether a file exists at `path`.
    fn exists(&mut self, path: &str) -> Result<bool, TransferError>;
    fn put(&mut self, path: &str, contents: &[u8]) -> Result<(), TransferError>;
    fn rename(&mut self, from: &str, to: &str) -> Result<(), TransferError>;
    fn delete(&mut self, path: &str) -> Result<(), TransferError>;
    fn quit(&mut self) -> Result<(), TransferError>;
}

/// Outcome of a successful deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeploySummary {
    pub files: usize,
    pub bytes: u64,
}

/// Hidden staging name for a remote path: `dir/.name.assetflow-part`.
pub fn staging_path(remote: &str) -> String {
    hidden_sibling(remote, STAGING_SUFFIX)
}

/// Hidden backup name for a remote path: `dir/.name.assetflow-old`.
pub fn backup_path(remote: &str) -> String {
    hidden_sibling(remote, BACKUP_SUFFIX)
}

fn hidden_sibling(remote: &str, suffix: &str) -> String {
    match remote.rsplit_once('/') {
        Some((dir, name)) => format!("{}/.{}{}", dir, name, suffix),
        None => format!(".{}{}", remote, suffix),
    }
}

/// A file renamed into place, with the backup of what it replaced.
struct Published {
    path: String,
    backup: Option<String>,
}

/// Rename every staged upload to its final name.
///
/// On failure the published files are removed, their backups restored and
/// the remaining staged uploads deleted.
fn publish(control: &mut dyn Remote, files: &[DeployFile], options: &DeployOptions) -> Result<(), TransferError> {
    let mut published: Vec<Published> = Vec::with_capacity(files.len());

    for (i, file) in files.iter().enumerate() {
        let path = options.remote_path(&file.remote);
        if let Err(error) = publish_one(control, &path, &mut published) {
            unpublish(control, &published);
            for pending in &files[i..] {
                let staged = staging_path(&options.remote_path(&pending.remote));
                if let Err(e) = control.delete(&staged) {
                    tracing::warn!("could not remove staged {}: {}", staged, e);
                }
            }
            return Err(error);
        }
    }

    for entry in &published {
        if let Some(backup) = &entry.backup {
            if let Err(e) = control.delete(backup) {
                tracing::warn!("could not remove backup {}: {}", backup, e);
            }
        }
    }
    Ok(())
}

fn publish_one(control: &mut dyn Remote, path: &str, published: &mut Vec<Published>) -> Result<(), TransferError> {
    let backup = if control.exists(path)? {
        let backup = backup_path(path);
        control.rename(path, &backup)?;
        Some(backup)
    } else {
        None
    };

    if let Err(error) = control.rename(&staging_path(path), path) {
        if let Some(backup) = &backup {
            if let Err(e) = control.rename(backup, path) {
                tracing::error!("could not restore {}: {}", path, e);
            }
        }
        return Err(error);
    }

    published.push(Published { path: path.to_string(), backup });
    Ok(())
}

fn unpublish(control: &mut dyn Remote, published: &[Published]) {
    for entry in published.iter().rev() {
        if let Err(e) = control.delete(&entry.path) {
            tracing::error!("could not remove {}: {}", entry.path, e);
            continue;
        }
        if let Some(backup) = &entry.backup {
            if let Err(e) = control.rename(backup, &entry.path) {
                tracing::error!("could not restore {}: {}", entry.path, e);
            }
        }
    }
}

/// Every remote directory the files need, parents first.
fn remote_dirs(files: &[DeployFile], options: &DeployOptions) -> Vec<String> {
    let root = options.remote_path("");
    let mut dirs = BTreeSet::new();

    let mut prefix = String::new();
    for part in root.split('/').filter(|p| !p.is_empty()) {
        prefix = format!("{}/{}", prefix, part);
        if root.starts_with('/') {
            dirs.insert(prefix.clone());
        } else {
            dirs.insert(prefix.trim_start_matches('/').to_string());
        }
    }

    for file in files {
        let parts: Vec<&str> = file.remote.split('/').collect();
        for depth in 1..parts.len() {
            dirs.insert(options.remote_path(&parts[..depth].join("/")));
        }
    }

    let mut dirs: Vec<String> = dirs.into_iter().collect();
    dirs.sort_by_key(|d| d.matches('/').count());
    dirs
}

/// Upload `files`, all or nothing.
pub fn deploy(
    files: &[DeployFile],
    options: &DeployOptions,
    connector: &dyn Connector,
) -> Result<DeploySummary, TransferError> {
    let start = Instant::now();
    let mut control = connector.connect()?;

    for dir in remote_dirs(files, options) {
        control.mkdir(&dir)?;
    }

    let next = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);
    let staged: Mutex<Vec<usize>> = Mutex::new(Vec::new());
    let failure: Mutex<Option<TransferError>> = Mutex::new(None);
    let bytes = AtomicUsize::new(0);
    let workers = options.parallel.max(1).min(files.len());

    let fail = |error: TransferError| {
        abort.store(true, Ordering::SeqCst);
        let mut slot = failure.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(error);
        }
    };

    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| {
                let mut remote = match connector.connect() {
                    Ok(remote) => remote,
                    Err(e) => return fail(e),
                };
                while !abort.load(Ordering::SeqCst) {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(file) = files.get(index) else { break };

                    let contents = match fs::read(&file.local) {
                        Ok(contents) => contents,
                        Err(source) => {
                            fail(TransferError::Local { path: file.local.clone(), source });
                            break;
                        }
                    };
                    let target = staging_path(&options.remote_path(&file.remote));
                    match remote.put(&target, &contents) {
                        Ok(()) => {
                            tracing::debug!("uploaded {}", file.remote);
                            bytes.fetch_add(contents.len(), Ordering::SeqCst);
                            staged.lock().unwrap_or_else(|e| e.into_inner()).push(index);
                        }
                        Err(e) => {
                            // A partial staged file may exist
                            staged.lock().unwrap_or_else(|e| e.into_inner()).push(index);
                            fail(TransferError::Upload { path: file.remote.clone(), source: Box::new(e) });
                            break;
                        }
                    }
                }
                if let Err(e) = remote.quit() {
                    tracing::debug!("closing upload session: {}", e);
                }
            });
        }
    });

    let staged = staged.into_inner().unwrap_or_else(|e| e.into_inner());
    if let Some(error) = failure.into_inner().unwrap_or_else(|e| e.into_inner()) {
        for index in staged {
            let target = staging_path(&options.remote_path(&files[index].remote));
            if let Err(e) = control.delete(&target) {
                tracing::warn!("could not remove staged {}: {}", target, e);
            }
        }
        let _ = control.quit();
        return Err(error);
    }

    if let Err(error) = publish(control.as_mut(), files, options) {
        let _ = control.quit();
        return Err(error);
    }
    control.quit()?;

    let summary = DeploySummary { files: files.len(), bytes: bytes.into_inner() as u64 };
    tracing::info!("Deployed {} file(s) in {}", summary.files, format_duration(start.elapsed()));
    Ok(summary)
}

/// Error from a full project deploy.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Schedule(#[from] SchedulerError),
    #[error("deploy entry point failed: {} task(s) reported errors", .0.len())]
    Build(Vec<TaskError>),
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Run the `deploy` entry point (if defined), then upload the site.
///
/// Credentials are checked before anything runs; `connect` is only called
/// once they are complete.
pub fn deploy_project<F>(
    context: &BuildContext,
    reporter: &dyn Reporter,
    connect: F,
) -> Result<DeploySummary, DeployError>
where
    F: FnOnce(&FtpCredentials) -> Box<dyn Connector>,
{
    let entries: Vec<String> =
        if context.graph().contains(DEPLOY_ENTRY) { vec![DEPLOY_ENTRY.to_string()] } else { Vec::new() };
    context.require_env(&entries, true)?;
    let credentials = context.env().ftp_credentials()?;

    if !entries.is_empty() {
        let report = context.scheduler(reporter).run_entry_point(DEPLOY_ENTRY)?;
        report.into_result().map_err(DeployError::Build)?;
    }

    let files = collect_files(context.project_root(), &context.config().deploy)?;
    tracing::info!("Uploading {} file(s) to {}:{}", files.len(), credentials.host, credentials.path);
    let connector = connect(&credentials);
    Ok(deploy(&files, &DeployOptions::from_credentials(&credentials), connector.as_ref())?)
}
