#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod blueprint;
pub mod config;
mod engine;
mod error;
pub mod loader;
mod output;
pub mod project;
mod utils;

pub use crate::blueprint::{Blueprint, TaskGraph};
pub use crate::config::{Config, Mode, ResolvedPaths};
pub use crate::engine::{
    DevServer, Notification, Task, TaskResult, WatchBinding, WatchDispatcher, WatchOptions,
    concurrent, sequence,
};
pub use crate::engine::runner::watch::resolve_watch_path;
pub use crate::error::*;
pub use crate::output::OutputJanitor;
pub use crate::project::Project;
