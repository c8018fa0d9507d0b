//! Asset transforms.
//!
//! Every kind of asset is handled by one [`AssetTransform`], a thin wrapper
//! around an external tool:
//!
//! | Transform               | Tool                          |
//! |-------------------------|-------------------------------|
//! | [`StyleTransform`]      | `grass`, then `lightningcss`  |
//! | [`ScriptTransform`]     | `esbuild` process             |
//! | [`RasterTransform`]     | `image` encoders              |
//! | [`SpriteTransform`]     | stack sprite builder          |
//! | [`HtmlTransform`]       | plain copy                    |
//!
//! Transforms are synchronous. [`transform_task`] turns one into a [`Task`]
//! which runs it on the blocking pool and reports the outcome.

pub mod html;
pub mod image;
pub mod js;
pub mod sprite;
pub mod styles;

use std::fmt::{self, Display};
use std::sync::Arc;

use camino::Utf8PathBuf;

use crate::config::{Config, Mode, ResolvedPaths};
use crate::engine::{DevServer, Task};
use crate::error::TransformError;

pub use html::HtmlTransform;
pub use image::RasterTransform;
pub use js::ScriptTransform;
pub use sprite::SpriteTransform;
pub use styles::StyleTransform;

/// Everything a transform may look at while running.
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub paths: Arc<ResolvedPaths>,
    /// Present while the dev loop is serving.
    pub server: Option<DevServer>,
}

impl Context {
    pub fn new(config: Arc<Config>, paths: Arc<ResolvedPaths>) -> Self {
        Self {
            config,
            paths,
            server: None,
        }
    }

    pub fn with_server(mut self, server: DevServer) -> Self {
        self.server = Some(server);
        self
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Style,
    Script,
    RasterImage,
    VectorSprite,
    Html,
}

impl Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetKind::Style => "style",
            AssetKind::Script => "script",
            AssetKind::RasterImage => "raster image",
            AssetKind::VectorSprite => "vector sprite",
            AssetKind::Html => "html",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The source could not be compiled (syntax or resolution error).
    Compile,
    /// The external tool failed internally.
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub detail: String,
}

impl Failure {
    pub fn compile(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Compile,
            detail: detail.into(),
        }
    }

    pub fn tool(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Tool,
            detail: detail.into(),
        }
    }
}

/// Outcome of a transform that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformResult {
    /// Files written by this run. Empty when everything was up to date.
    Written(Vec<Utf8PathBuf>),
    /// Nothing was written for this stage.
    Failed(Failure),
}

/// A component converting source files of one kind into output artifacts.
pub trait AssetTransform: Send + Sync {
    fn kind(&self) -> AssetKind;

    /// Runs the external tool. `Err` is reserved for conditions that must
    /// abort the invoking sequence.
    fn run(&self, ctx: &Context) -> Result<TransformResult, TransformError>;
}

/// Wraps `transform` into a task running it on the blocking pool.
///
/// Failed results are logged and count as a completed task, fatal errors
/// fail the task.
pub fn transform_task<T>(name: &'static str, transform: T, ctx: Context) -> Task
where
    T: AssetTransform + 'static,
{
    let transform = Arc::new(transform);

    Task::new(name, move || {
        let transform = transform.clone();
        let ctx = ctx.clone();

        async move {
            let kind = transform.kind();
            let result = tokio::task::spawn_blocking(move || transform.run(&ctx)).await??;
            report(kind, &result);
            Ok(())
        }
    })
}

fn report(kind: AssetKind, result: &TransformResult) {
    match result {
        TransformResult::Written(paths) if paths.is_empty() => {
            tracing::info!("{kind}: up to date");
        }
        TransformResult::Written(paths) => {
            for path in paths {
                tracing::info!("{kind}: wrote {path}");
            }
        }
        TransformResult::Failed(Failure {
            kind: FailureKind::Compile,
            detail,
        }) => {
            tracing::error!("{kind}: compile error\n{detail}");
        }
        TransformResult::Failed(Failure {
            kind: FailureKind::Tool,
            detail,
        }) => {
            tracing::warn!("{kind}: tool error\n{detail}");
        }
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    use std::sync::Arc;

    use camino::Utf8PathBuf;

    use super::Context;
    use crate::config::{Config, Mode, ResolvedPaths};

    pub(crate) struct Fixture {
        _dir: tempfile::TempDir,
        pub root: Utf8PathBuf,
        pub paths: Arc<ResolvedPaths>,
        pub config: Arc<Config>,
    }

    impl Fixture {
        pub(crate) fn new(mode: Mode) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = Utf8PathBuf::try_from(dir.path().canonicalize().unwrap()).unwrap();
            let config = Config::new(root.clone()).with_mode(mode);
            let paths = ResolvedPaths::resolve(&config);

            Self {
                _dir: dir,
                root,
                paths: Arc::new(paths),
                config: Arc::new(config),
            }
        }

        pub(crate) fn context(&self) -> Context {
            Context::new(self.config.clone(), self.paths.clone())
        }

        pub(crate) fn write(&self, path: &Utf8PathBuf, data: impl AsRef<[u8]>) {
            crate::output::write_output(path, data).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counting(Arc<AtomicUsize>, Result<(), ()>);

    impl AssetTransform for Counting {
        fn kind(&self) -> AssetKind {
            AssetKind::Style
        }

        fn run(&self, _: &Context) -> Result<TransformResult, TransformError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            match self.1 {
                Ok(()) => Ok(TransformResult::Failed(Failure::compile("bad token"))),
                Err(()) => Err(TransformError::Io(std::io::Error::other("disk gone"))),
            }
        }
    }

    #[tokio::test]
    async fn test_failed_result_completes_task() {
        let fixture = fixture::Fixture::new(Mode::Development);
        let runs = Arc::new(AtomicUsize::new(0));
        let task = transform_task("styles", Counting(runs.clone(), Ok(())), fixture.context());

        task.run().await.unwrap();
        task.run().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_fails_task() {
        let fixture = fixture::Fixture::new(Mode::Development);
        let runs = Arc::new(AtomicUsize::new(0));
        let task = transform_task("styles", Counting(runs, Err(())), fixture.context());

        let err = task.run().await.unwrap_err();
        assert!(format!("{err:?}").contains("disk gone"));
    }
}
