//! Task pipeline for assetflow
//!
//! Provides the core of the orchestrator: tasks, their registry, the
//! entry-point graph and the scheduler that runs it.
//!
//! # Overview
//!
//! The pipeline consists of:
//! - **Discovery**: Resolve each task's glob patterns into a [`SourceSet`]
//! - **Validation**: Build the [`TaskRegistry`] and [`TaskGraph`], rejecting
//!   overlapping destinations, unknown names and cycles
//! - **Execution**: Run an entry point with the [`Scheduler`], committing each
//!   task's [`ArtifactSet`] all-or-nothing
//!
//! # Example
//!
//! ```ignore
//! use assetflow::build::{BuildContext, ConsoleReporter};
//! use assetflow::config::{load_config, Environment};
//!
//! let config = load_config(None)?;
//! let context = BuildContext::new(config, project_root, Environment::from_env())?;
//! let report = context.scheduler(&ConsoleReporter).run_entry_point("build")?;
//! println!("{}", report.summary());
//! ```

pub mod artifact;
pub mod context;
pub mod discovery;
pub mod graph;
pub mod registry;
pub mod report;
pub mod result;
pub mod runner;
pub mod scheduler;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use artifact::*;
pub use context::*;
pub use discovery::*;
pub use graph::*;
pub use registry::*;
pub use report::*;
pub use result::*;
pub use runner::*;
pub use scheduler::*;
pub use task::*;
