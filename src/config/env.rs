//! Environment-provided credentials.
//!
//! Read once at startup and passed explicitly to the tasks and the deploy
//! step that need them.

use super::loader::ConfigError;

/// Default number of parallel FTP connections.
pub const DEFAULT_FTP_PARALLEL: usize = 10;

/// Remote transfer credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct FtpCredentials {
    pub host: String,
    pub user: String,
    pub password: String,
    /// Remote directory the site is uploaded into
    pub path: String,
    /// Maximum number of simultaneous connections
    pub parallel: usize,
}

impl std::fmt::Debug for FtpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpCredentials")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("path", &self.path)
            .field("parallel", &self.parallel)
            .finish()
    }
}

/// Everything the pipeline reads from the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub ftp_host: Option<String>,
    pub ftp_user: Option<String>,
    pub ftp_password: Option<String>,
    pub ftp_path: Option<String>,
    pub ftp_parallel: Option<String>,
    pub tinypng_api_key: Option<String>,
}

impl Environment {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup function. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            ftp_host: get("FTP_HOST"),
            ftp_user: get("FTP_USER"),
            ftp_password: get("FTP_PASSWORD"),
            ftp_path: get("FTP_PATH"),
            ftp_parallel: get("FTP_PARALLEL"),
            tinypng_api_key: get("TINYPNG_API_KEY"),
        }
    }

    /// Names of the variables a run needs but that are unset.
    pub fn missing(&self, needs_image_service: bool, deploying: bool) -> Vec<String> {
        let mut missing = Vec::new();
        if needs_image_service && self.tinypng_api_key.is_none() {
            missing.push("TINYPNG_API_KEY".to_string());
        }
        if deploying {
            for (name, value) in [
                ("FTP_HOST", &self.ftp_host),
                ("FTP_USER", &self.ftp_user),
                ("FTP_PASSWORD", &self.ftp_password),
                ("FTP_PATH", &self.ftp_path),
            ] {
                if value.is_none() {
                    missing.push(name.to_string());
                }
            }
        }
        missing
    }

    /// Fail with [`ConfigError::MissingEnv`] unless everything a run needs is set.
    pub fn require(&self, needs_image_service: bool, deploying: bool) -> Result<(), ConfigError> {
        let missing = self.missing(needs_image_service, deploying);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingEnv(missing))
        }
    }

    /// Assemble FTP credentials, failing on anything missing or malformed.
    pub fn ftp_credentials(&self) -> Result<FtpCredentials, ConfigError> {
        self.require(false, true)?;

        let parallel = match &self.ftp_parallel {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidEnv(
                        "FTP_PARALLEL".to_string(),
                        format!("expected a positive integer, got '{}'", raw),
                    ))
                }
            },
            None => DEFAULT_FTP_PARALLEL,
        };

        // require() above guarantees these are present
        let field = |v: &Option<String>| v.clone().unwrap_or_default();
        Ok(FtpCredentials {
            host: field(&self.ftp_host),
            user: field(&self.ftp_user),
            password: field(&self.ftp_password),
            path: field(&self.ftp_path),
            parallel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_nothing_needed() {
        let env = Environment::default();
        assert!(env.missing(false, false).is_empty());
        assert!(env.require(false, false).is_ok());
    }

    #[test]
    fn test_missing_lists_every_deploy_variable() {
        let env = Environment::from_lookup(lookup(&[("FTP_HOST", "ftp.example.com")]));
        assert_eq!(env.missing(false, true), vec!["FTP_USER", "FTP_PASSWORD", "FTP_PATH"]);
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let env = Environment::from_lookup(lookup(&[("TINYPNG_API_KEY", "  ")]));
        assert_eq!(env.missing(true, false), vec!["TINYPNG_API_KEY"]);
        assert!(matches!(env.require(true, false), Err(ConfigError::MissingEnv(_))));
    }

    #[test]
    fn test_ftp_credentials_default_parallel() {
        let env = Environment::from_lookup(lookup(&[
            ("FTP_HOST", "ftp.example.com"),
            ("FTP_USER", "deployer"),
            ("FTP_PASSWORD", "hunter2"),
            ("FTP_PATH", "/public_html"),
        ]));
        let creds = env.ftp_credentials().unwrap();
        assert_eq!(creds.host, "ftp.example.com");
        assert_eq!(creds.parallel, DEFAULT_FTP_PARALLEL);
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn test_ftp_credentials_invalid_parallel() {
        let env = Environment::from_lookup(lookup(&[
            ("FTP_HOST", "h"),
            ("FTP_USER", "u"),
            ("FTP_PASSWORD", "p"),
            ("FTP_PATH", "/"),
            ("FTP_PARALLEL", "0"),
        ]));
        assert!(matches!(env.ftp_credentials(), Err(ConfigError::InvalidEnv(name, _)) if name == "FTP_PARALLEL"));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        std::env::set_var("TINYPNG_API_KEY", "key-123");
        let env = Environment::from_env();
        std::env::remove_var("TINYPNG_API_KEY");
        assert_eq!(env.tinypng_api_key.as_deref(), Some("key-123"));
    }
}
