//! Build command implementations (build, run, list)

use std::process::ExitCode;

use super::{EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};
use crate::build::{BuildContext, ConsoleReporter, RunReport};
use crate::config::TaskKindConfig;

/// Entry point run by `assetflow build`.
pub const BUILD_ENTRY: &str = "build";

/// Run the build command
pub fn run_build(context: &BuildContext) -> ExitCode {
    if !context.graph().contains(BUILD_ENTRY) {
        tracing::error!("No '{}' entry point is defined", BUILD_ENTRY);
        return ExitCode::from(EXIT_INVALID_ARGS);
    }
    run_targets(context, &[BUILD_ENTRY.to_string()])
}

/// Run entry points or tasks by name, in order
pub fn run_targets(context: &BuildContext, targets: &[String]) -> ExitCode {
    if let Err(e) = context.require_env(targets, false) {
        tracing::error!("{}", e);
        return ExitCode::from(EXIT_INVALID_ARGS);
    }

    let reporter = ConsoleReporter;
    match context.scheduler(&reporter).run_targets(targets) {
        Ok(report) => finish(&report),
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(EXIT_INVALID_ARGS)
        }
    }
}

/// Log the run summary.
pub(crate) fn log_summary(report: &RunReport) {
    if report.is_success() {
        tracing::info!("{}", report.summary());
    } else {
        tracing::error!("{}", report.summary());
    }
}

/// Log the run summary and map it to an exit code.
pub(crate) fn finish(report: &RunReport) -> ExitCode {
    log_summary(report);
    if report.is_success() {
        ExitCode::from(EXIT_SUCCESS)
    } else {
        ExitCode::from(EXIT_ERROR)
    }
}

/// Print tasks and entry points
pub fn run_list(context: &BuildContext) -> ExitCode {
    println!("Tasks:");
    for (name, task) in &context.config().tasks {
        let detail = match &task.kind {
            TaskKindConfig::Scripts { bundle: Some(bundle), .. } => format!(" (bundle {})", bundle),
            TaskKindConfig::OptimizeImages { .. } => " (needs TINYPNG_API_KEY)".to_string(),
            _ => String::new(),
        };
        println!("  {:<12} {:<16} -> {}{}", name, task.kind.kind_name(), task.dest.display(), detail);
    }

    println!();
    println!("Entry points:");
    for entry in context.graph().entry_names() {
        println!("  {:<12} {}", entry, context.graph().tasks_for(entry).join(", "));
    }

    ExitCode::from(EXIT_SUCCESS)
}
