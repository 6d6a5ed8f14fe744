//! assetflow - front-end asset pipeline and task orchestrator for static sites
//!
//! This library provides functionality to:
//! - Declare asset tasks (styles, scripts, copies, image optimization, WebP)
//!   and compose them into parallel and sequential entry points
//! - Run entry points with per-task failure isolation
//! - Watch sources and re-run only the affected tasks, with live reload
//! - Upload the finished site over FTP, all or nothing

pub mod build;
pub mod cli;
pub mod config;
pub mod deploy;
pub mod serve;
pub mod tasks;
pub mod watch;
