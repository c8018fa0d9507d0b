//! Tasks and the combinators composing them.
//!
//! A [`Task`] is a named, zero-argument unit of asynchronous work. Tasks are
//! cheap to clone; cloning shares the underlying closure. Composite tasks are
//! built with [`sequence`] and [`concurrent`], and may refer to other tasks by
//! name with [`Task::call`]. References are resolved when a
//! [`Blueprint`](crate::Blueprint) is finished.

pub(crate) mod runner;

use std::borrow::Cow;
use std::fmt::{self, Display};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use tokio::task::JoinSet;
use tracing::{Instrument, Level};
use tracing_indicatif::span_ext::IndicatifSpanExt;

pub use runner::http::{DevServer, Notification};
pub use runner::watch::{WatchBinding, WatchDispatcher, WatchOptions};

/// Result from a single executed task.
pub type TaskResult = anyhow::Result<()>;

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type TaskFn = Arc<dyn Fn() -> BoxFuture<TaskResult> + Send + Sync>;

#[derive(Clone)]
pub struct Task {
    name: Cow<'static, str>,
    kind: Kind,
}

#[derive(Clone)]
pub(crate) enum Kind {
    Unit(TaskFn),
    Sequence(Vec<Task>),
    Concurrent(Vec<Task>),
    Call(Cow<'static, str>),
}

impl Task {
    /// Creates a task from a closure producing a future.
    pub fn new<F, Fut>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind: Kind::Unit(Arc::new(move || -> BoxFuture<TaskResult> { Box::pin(func()) })),
        }
    }

    /// Refers to the task registered under `name` in the same blueprint.
    pub fn call(name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        Self {
            name: name.clone(),
            kind: Kind::Call(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the task, keeping its body.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut Kind {
        &mut self.kind
    }

    /// Runs the task to completion.
    ///
    /// The returned future owns everything it needs, so it can be spawned.
    pub fn run(&self) -> BoxFuture<TaskResult> {
        Box::pin(execute(self.clone()))
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match &self.kind {
            Kind::Unit(_) => writeln!(f, "{pad}{}", self.name),
            Kind::Call(name) => writeln!(f, "{pad}-> {name}"),
            Kind::Sequence(tasks) | Kind::Concurrent(tasks) => {
                let label = match self.kind {
                    Kind::Sequence(_) => "sequence",
                    _ => "concurrent",
                };
                writeln!(f, "{pad}{} ({label})", self.name)?;
                for task in tasks {
                    task.fmt_tree(f, depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

async fn execute(task: Task) -> TaskResult {
    match &task.kind {
        Kind::Unit(func) => {
            let span = tracing::span!(Level::INFO, "task", name = %task.name);
            span.pb_set_style(&crate::utils::get_style_task());
            span.pb_set_message(&format!("Running {}", task.name));

            let s = Instant::now();
            func().instrument(span).await?;
            tracing::info!("finished '{}' {}", task.name, crate::utils::as_overhead(s));

            Ok(())
        }
        Kind::Sequence(tasks) => {
            for child in tasks {
                child
                    .run()
                    .await
                    .with_context(|| format!("stage '{}' of '{}'", child.name, task.name))?;
            }

            Ok(())
        }
        Kind::Concurrent(tasks) => {
            let mut set = JoinSet::new();
            for child in tasks {
                let name = child.name.clone();
                let fut = child.run();
                set.spawn(async move { fut.await.with_context(|| format!("'{name}'")) });
            }

            let mut first = None;
            while let Some(joined) = set.join_next().await {
                let result = joined.map_err(anyhow::Error::from).and_then(|r| r);
                if let Err(e) = result {
                    tracing::error!("{e:?}");
                    first.get_or_insert(e);
                }
            }

            match first {
                Some(e) => Err(e.context(format!("concurrent '{}'", task.name))),
                None => Ok(()),
            }
        }
        Kind::Call(name) => anyhow::bail!("unresolved reference to task '{name}'"),
    }
}

impl Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_tree(f, 0)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.name)
    }
}

fn compose_name(tasks: &[Task]) -> String {
    tasks.iter().map(Task::name).collect::<Vec<_>>().join(", ")
}

/// Runs `tasks` one after another. Stage N+1 starts only after stage N has
/// completed successfully; the first failure stops the sequence.
pub fn sequence(tasks: impl IntoIterator<Item = Task>) -> Task {
    let tasks: Vec<_> = tasks.into_iter().collect();
    Task {
        name: format!("sequence({})", compose_name(&tasks)).into(),
        kind: Kind::Sequence(tasks),
    }
}

/// Runs `tasks` at the same time and waits for all of them. No ordering is
/// guaranteed between them. Fails with the first error observed, after every
/// task has finished.
pub fn concurrent(tasks: impl IntoIterator<Item = Task>) -> Task {
    let tasks: Vec<_> = tasks.into_iter().collect();
    Task {
        name: format!("concurrent({})", compose_name(&tasks)).into(),
        kind: Kind::Concurrent(tasks),
    }
}
