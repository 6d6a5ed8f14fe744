//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations.

mod build;
mod deploy;
mod init;
mod serve;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::build::BuildContext;
use crate::config::loader::{
    default_config, find_config, load_config, merge_cli_overrides, project_root, CliOverrides,
};
use crate::config::Environment;

pub use init::InitError;

/// Process exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// assetflow - front-end asset pipeline for static sites
#[derive(Parser)]
#[command(name = "assetflow")]
#[command(about = "Compile styles and scripts, optimize images, preview with live reload, and deploy over FTP")]
#[command(version)]
pub struct Cli {
    /// Show debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only show warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to assetflow.toml (default: search upward from the current directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the `default` entry point, then watch and serve with live reload
    Serve {
        /// Preview server port
        #[arg(long)]
        port: Option<u16>,

        /// Preview server host
        #[arg(long)]
        host: Option<String>,

        /// Watch debounce delay in milliseconds
        #[arg(long, value_name = "MS")]
        debounce: Option<u32>,

        /// Watch and rebuild without starting the preview server
        #[arg(long)]
        no_server: bool,
    },
    /// Run the `build` entry point
    Build,
    /// Run the `deploy` entry point (if defined), then upload over FTP
    Deploy {
        /// List the files that would be uploaded and exit
        #[arg(long)]
        dry_run: bool,
    },
    /// Run entry points or single tasks by name
    Run {
        /// Entry point or task names, run in order
        #[arg(required = true)]
        targets: Vec<String>,
    },
    /// List tasks and entry points
    List,
    /// Write a starter assetflow.toml
    Init {
        /// Directory to create the config in (default: current directory)
        path: Option<PathBuf>,

        /// Project name (default: directory name)
        #[arg(long)]
        name: Option<String>,

        /// Overwrite an existing assetflow.toml
        #[arg(long)]
        force: bool,
    },
}

/// Log filter for the verbosity flags, used when `RUST_LOG` is unset.
pub fn log_filter(verbose: bool, quiet: bool) -> &'static str {
    if verbose {
        "assetflow=debug,tower_http=debug"
    } else if quiet {
        "assetflow=warn"
    } else {
        "assetflow=info"
    }
}

/// Locate and load the project, then assemble its build context.
///
/// Without a config file the built-in default is used, rooted at the
/// current directory.
pub(crate) fn load_context(config_path: Option<&Path>, overrides: &CliOverrides) -> Result<BuildContext, ExitCode> {
    let cwd = std::env::current_dir().unwrap_or_default();
    let path = match config_path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config(),
    };

    let (mut config, root) = match path {
        Some(path) => {
            tracing::debug!("Using config: {}", path.display());
            let config = load_config(Some(&path)).map_err(|e| {
                tracing::error!("Error loading {}: {}", path.display(), e);
                ExitCode::from(EXIT_INVALID_ARGS)
            })?;
            let root = match project_root(&path) {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => cwd,
            };
            (config, root)
        }
        None => {
            tracing::debug!("No assetflow.toml found, using defaults");
            (default_config(), cwd)
        }
    };

    merge_cli_overrides(&mut config, overrides);

    BuildContext::new(config, root, Environment::from_env()).map_err(|e| {
        tracing::error!("{}", e);
        ExitCode::from(EXIT_INVALID_ARGS)
    })
}

/// Run the CLI
pub fn run(cli: Cli) -> ExitCode {
    let command =
        cli.command.unwrap_or(Commands::Serve { port: None, host: None, debounce: None, no_server: false });
    let config = cli.config.as_deref();

    let (overrides, command) = match command {
        Commands::Init { path, name, force } => return init::run_init(path.as_deref(), name.as_deref(), force),
        Commands::Serve { port, host, debounce, no_server } => (
            CliOverrides { host, port, debounce_ms: debounce },
            Commands::Serve { port, host: None, debounce, no_server },
        ),
        other => (CliOverrides::default(), other),
    };

    let context = match load_context(config, &overrides) {
        Ok(context) => context,
        Err(code) => return code,
    };

    match command {
        Commands::Serve { no_server, .. } => serve::run_serve(context, no_server),
        Commands::Build => build::run_build(&context),
        Commands::Deploy { dry_run } => deploy::run_deploy(&context, dry_run),
        Commands::Run { targets } => build::run_targets(&context, &targets),
        Commands::List => build::run_list(&context),
        Commands::Init { .. } => ExitCode::from(EXIT_SUCCESS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["assetflow", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_run_requires_targets() {
        assert!(Cli::try_parse_from(["assetflow", "run"]).is_err());
        let cli = Cli::try_parse_from(["assetflow", "run", "css", "build"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Run { ref targets }) if targets == &["css", "build"]));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["assetflow", "build", "--config", "site/assetflow.toml", "-q"]).unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.config, Some(PathBuf::from("site/assetflow.toml")));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["assetflow", "-v", "-q"]).is_err());
    }

    #[test]
    fn test_serve_options() {
        let cli =
            Cli::try_parse_from(["assetflow", "serve", "--port", "8080", "--debounce", "250", "--no-server"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Serve { port: Some(8080), debounce: Some(250), no_server: true, .. })
        ));
    }

    #[test]
    fn test_log_filter() {
        assert_eq!(log_filter(false, false), "assetflow=info");
        assert_eq!(log_filter(false, true), "assetflow=warn");
        assert!(log_filter(true, false).starts_with("assetflow=debug"));
    }
}
