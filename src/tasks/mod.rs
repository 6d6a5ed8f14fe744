//! Concrete task kinds.
//!
//! Each `kind` in `assetflow.toml` maps to one implementation here:
//!
//! | kind              | task                  |
//! |-------------------|-----------------------|
//! | `styles`          | [`StylesTask`]        |
//! | `scripts`         | [`ScriptsTask`]       |
//! | `copy`            | [`CopyTask`]          |
//! | `optimize-images` | [`OptimizeImagesTask`]|
//! | `webp`            | [`WebpTask`]          |

pub mod copy;
pub mod images;
pub mod scripts;
pub mod styles;
pub mod tool;
pub mod webp;

pub use copy::CopyTask;
pub use images::{ImageOptimizer, OptimizeError, OptimizeImagesTask, TinifyClient};
pub use scripts::ScriptsTask;
pub use styles::StylesTask;
pub use tool::ExternalTool;
pub use webp::WebpTask;

use crate::build::{Task, TaskError, TaskSpec};
use crate::config::{Environment, TaskConfig, TaskKindConfig};
use std::path::Path;
use std::sync::Arc;

/// Instantiate the task described by a `[tasks.<name>]` table.
pub fn create_task(name: &str, config: &TaskConfig, root: &Path, env: &Environment) -> Arc<dyn Task> {
    let spec = TaskSpec::new(name, config.sources.clone(), config.dest.clone());
    match &config.kind {
        TaskKindConfig::Styles { command, minify, browsers, sourcemaps } => {
            Arc::new(StylesTask::new(spec, command.as_deref(), *minify, browsers).with_sourcemaps(*sourcemaps))
        }
        TaskKindConfig::Scripts { commands, bundle, sourcemaps } => {
            Arc::new(ScriptsTask::new(spec, commands, bundle.clone()).with_sourcemaps(*sourcemaps))
        }
        TaskKindConfig::Copy => Arc::new(CopyTask::new(spec)),
        TaskKindConfig::OptimizeImages { signatures } => {
            let optimizer = env
                .tinypng_api_key
                .as_ref()
                .map(|key| Arc::new(TinifyClient::new(key.clone())) as Arc<dyn ImageOptimizer>);
            let dest_dir = root.join(&config.dest);
            Arc::new(OptimizeImagesTask::new(spec, dest_dir, signatures.clone(), optimizer))
        }
        TaskKindConfig::Webp => Arc::new(WebpTask::new(spec)),
    }
}

/// Read a source file, mapping failures to the task's error.
pub(crate) fn read_source(task: &str, path: &Path) -> Result<Vec<u8>, TaskError> {
    std::fs::read(path).map_err(|e| TaskError::io(task, path, e))
}
