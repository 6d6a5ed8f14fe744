//! Serve command: initial build, then watch with live reload

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use super::{EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};
use crate::build::{BuildContext, ConsoleReporter};
use crate::serve::{wait_for_ctrl_c, DevServer};
use crate::watch::{bindings_from_config, ContextExecutor, NoReload, ReloadNotifier, Watcher};

/// Entry point run before watching.
pub const DEFAULT_ENTRY: &str = "default";

fn server_addr(host: &str, port: u16) -> Option<SocketAddr> {
    (host, port).to_socket_addrs().ok()?.next()
}

/// Entry points and tasks `serve` may run: the initial build plus every watched task.
fn serve_selection(context: &BuildContext) -> Vec<String> {
    let mut selected: Vec<String> =
        if context.graph().contains(DEFAULT_ENTRY) { vec![DEFAULT_ENTRY.to_string()] } else { Vec::new() };
    for binding in bindings_from_config(context.config()) {
        if let Some(owner) = binding.owner {
            if !selected.contains(&owner) {
                selected.push(owner);
            }
        }
    }
    selected
}

/// Run the serve command
pub fn run_serve(context: BuildContext, no_server: bool) -> ExitCode {
    let selected = serve_selection(&context);
    if let Err(e) = context.require_env(&selected, false) {
        tracing::error!("{}", e);
        return ExitCode::from(EXIT_INVALID_ARGS);
    }

    let reporter = Arc::new(ConsoleReporter);
    if !context.graph().contains(DEFAULT_ENTRY) {
        tracing::warn!("No '{}' entry point; skipping the initial build", DEFAULT_ENTRY);
    } else {
        match context.scheduler(reporter.as_ref()).run_entry_point(DEFAULT_ENTRY) {
            // Failures are reported; watching continues so they can be fixed
            Ok(report) => super::build::log_summary(&report),
            Err(e) => {
                tracing::error!("{}", e);
                return ExitCode::from(EXIT_INVALID_ARGS);
            }
        }
    }

    let serve = context.config().serve.clone();
    let watch = context.config().watch.clone();
    let root = context.project_root().to_path_buf();
    let bindings = bindings_from_config(context.config());
    let context = Arc::new(context);

    let server = if no_server {
        None
    } else {
        let Some(addr) = server_addr(&serve.host, serve.port) else {
            tracing::error!("Invalid server address {}:{}", serve.host, serve.port);
            return ExitCode::from(EXIT_INVALID_ARGS);
        };
        let site_root: PathBuf = match &serve.root {
            Some(dir) => context.resolve_path(dir),
            None => root.clone(),
        };
        match DevServer::start(&site_root, addr) {
            Ok(server) => Some(server),
            Err(e) => {
                tracing::error!("{}", e);
                return ExitCode::from(EXIT_ERROR);
            }
        }
    };

    let notifier: Arc<dyn ReloadNotifier> = match &server {
        Some(server) => Arc::new(server.reloader()),
        None => Arc::new(NoReload),
    };
    let executor = Arc::new(ContextExecutor::new(Arc::clone(&context), reporter));

    let watcher = Watcher::new(root, bindings, Duration::from_millis(u64::from(watch.debounce_ms)));
    let handle = match watcher.start(executor, notifier) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };
    tracing::info!("Press Ctrl+C to stop");

    let waited = match server {
        Some(server) => server.wait(),
        None => wait_for_ctrl_c(),
    };
    handle.stop();

    match waited {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
