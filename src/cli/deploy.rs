//! Deploy command

use std::process::ExitCode;

use super::{EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};
use crate::build::{BuildContext, ConsoleReporter};
use crate::deploy::{collect_files, deploy_project, DeployError, FtpConnector};

/// Run the deploy command
pub fn run_deploy(context: &BuildContext, dry_run: bool) -> ExitCode {
    if dry_run {
        return match collect_files(context.project_root(), &context.config().deploy) {
            Ok(files) => {
                println!("Dry run - would upload {} file(s):", files.len());
                for file in &files {
                    println!("  {}", file.remote);
                }
                ExitCode::from(EXIT_SUCCESS)
            }
            Err(e) => {
                tracing::error!("{}", e);
                ExitCode::from(EXIT_ERROR)
            }
        };
    }

    let result = deploy_project(context, &ConsoleReporter, |credentials| {
        Box::new(FtpConnector::new(credentials.clone()))
    });
    match result {
        Ok(summary) => {
            tracing::info!("Uploaded {} file(s), {} bytes", summary.files, summary.bytes);
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e @ (DeployError::Config(_) | DeployError::Schedule(_))) => {
            tracing::error!("{}", e);
            ExitCode::from(EXIT_INVALID_ARGS)
        }
        Err(e) => {
            tracing::error!("Deploy aborted: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
