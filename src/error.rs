use camino::Utf8PathBuf;
use thiserror::Error;

pub use anyhow::Error as RuntimeError;

#[derive(Debug, Error)]
pub enum TsumikiError {
    #[error("Failed to build runtime")]
    RuntimeBuild(#[source] std::io::Error),

    #[error("Error while loading the configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Error in the task graph:\n{0}")]
    Graph(#[from] GraphError),

    #[error("Error while starting the dev server:\n{0}")]
    Server(#[from] ServerError),

    #[error("Task '{0}' failed:\n{1:?}")]
    Task(String, RuntimeError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{path}'.\n{source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't parse config file '{path}'.\n{source}")]
    Parse {
        path: Utf8PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Task '{0}' is already registered")]
    Duplicate(String),

    #[error("Task '{referrer}' refers to unknown task '{name}'")]
    Unknown { referrer: String, name: String },

    #[error("Task '{0}' is part of a reference cycle")]
    Cycle(String),

    #[error("No task named '{0}'")]
    NotFound(String),
}

/// Fatal transform errors. Compiler and tool failures are not errors, they
/// are reported through [`crate::loader::TransformResult::Failed`].
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Couldn't read entry file '{path}'.\n{source}")]
    MissingEntry {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't run '{program}'.\n{source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("The dev server is already serving on {0}")]
    AlreadyServing(std::net::SocketAddr),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}
