//! Watch mode is implemented as a registry of independent bindings:
//!
//! 1. **File watcher**: Uses the `notify` crate to monitor the static roots of
//!    every binding's glob patterns recursively. Events are debounced so
//!    rapid saves collapse into one delivery.
//! 2. **Bindings**: Each [`WatchBinding`] owns one worker on the runtime.
//!    A matching event triggers the worker, which runs the bound task and,
//!    if asked to, tells the [`DevServer`] to reload its viewers.
//!
//! ## The Loop
//!
//! Each binding cycles Idle → Triggered → Running → Idle. A trigger arriving
//! while the task is running is remembered, and the task runs exactly once
//! more afterwards. Bindings never wait for each other, so two kinds of
//! assets can rebuild at the same time; they write to disjoint parts of the
//! output tree.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::engine::runner::run_reported;
use crate::engine::{DevServer, Notification, Task};
use crate::error::WatchError;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Run the task once as soon as the binding is registered.
    pub trigger_on_startup: bool,
}

/// Associates file patterns with a task to re-run when they change.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    patterns: Vec<String>,
    options: WatchOptions,
    task: Task,
    reload: bool,
}

impl WatchBinding {
    pub fn new<S: Into<String>>(patterns: impl IntoIterator<Item = S>, task: Task) -> Self {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            options: WatchOptions::default(),
            task,
            reload: false,
        }
    }

    pub fn options(mut self, options: WatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Ask connected viewers for a full reload after every successful run.
    pub fn reload_viewers(mut self) -> Self {
        self.reload = true;
        self
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn task(&self) -> &Task {
        &self.task
    }
}

/// Registry of [`WatchBinding`]s sharing one file watcher.
pub struct WatchDispatcher {
    bindings: Vec<WatchBinding>,
    server: Option<DevServer>,
    debounce: Duration,
}

struct Matcher {
    patterns: Vec<Pattern>,
    trigger: mpsc::Sender<()>,
}

impl Matcher {
    fn matches(&self, path: &Path) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_path_with(path, MATCH_OPTIONS))
    }
}

impl WatchDispatcher {
    pub fn new(server: Option<DevServer>, debounce: Duration) -> Self {
        Self {
            bindings: Vec::new(),
            server,
            debounce,
        }
    }

    pub fn bind(mut self, binding: WatchBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn bindings(&self) -> &[WatchBinding] {
        &self.bindings
    }

    /// Registers every binding and dispatches file events for the rest of the
    /// process. Dropping the future stops all bindings.
    pub async fn run(self) -> Result<(), WatchError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(self.debounce, None, move |result: DebounceEventResult| {
            let _ = tx.send(result);
        })?;

        let mut workers = JoinSet::new();
        let mut matchers = Vec::with_capacity(self.bindings.len());
        let mut watched = HashSet::new();

        for binding in self.bindings {
            let mut patterns = Vec::new();
            for glob in &binding.patterns {
                match resolve_watch_path(glob) {
                    Ok((root, pattern)) => {
                        watched.insert(root);
                        patterns.push(pattern);
                    }
                    Err(e) => tracing::error!("failed to resolve path {glob}: {e}"),
                }
            }

            let (trigger, pending) = mpsc::channel(1);
            if binding.options.trigger_on_startup {
                let _ = trigger.try_send(());
            }

            matchers.push(Matcher { patterns, trigger });
            workers.spawn(drive(binding.task, binding.reload, self.server.clone(), pending));
        }

        // Collapse watched paths to reduce the number of watches
        for path in collapse_watch_paths(watched) {
            tracing::info!("watching {}", path);
            debouncer.watch(&path, RecursiveMode::Recursive)?;
        }

        while let Some(result) = rx.recv().await {
            match result {
                Ok(events) => {
                    for event in events {
                        if event.kind.is_access() {
                            continue;
                        }

                        for path in &event.paths {
                            for matcher in matchers.iter().filter(|m| m.matches(path)) {
                                // A full channel means a run is already pending.
                                let _ = matcher.trigger.try_send(());
                            }
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        tracing::error!("watch error: {:?}", e);
                    }
                }
            }
        }

        Ok(())
    }
}

async fn drive(
    task: Task,
    reload: bool,
    server: Option<DevServer>,
    mut pending: mpsc::Receiver<()>,
) {
    while pending.recv().await.is_some() {
        tracing::info!("change detected, running '{}'", task.name());

        if run_reported(&task).await
            && reload
            && let Some(server) = &server
        {
            server.notify(Notification::Reload);
        }
    }
}

/// Splits a glob string into a canonicalized static root path (for
/// watching) and a compiled absolute Pattern (for matching).
///
/// A static root that does not exist yet is matched at its eventual location
/// while its nearest existing ancestor is watched, so the binding fires once
/// the directory appears.
pub fn resolve_watch_path(glob_str: impl AsRef<str>) -> anyhow::Result<(Utf8PathBuf, Pattern)> {
    let path = Utf8Path::new(glob_str.as_ref());

    // Split path into static root and dynamic suffix (containing wildcards)
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    let root_part = match root_part.is_absolute() {
        true => root_part,
        false => Utf8PathBuf::try_from(std::env::current_dir()?)?.join(root_part),
    };

    // Walk up to the closest ancestor present on disk
    let mut existing = root_part.as_path();
    let mut missing = Vec::new();
    while !existing.exists() {
        let (Some(name), Some(parent)) = (existing.file_name(), existing.parent()) else {
            anyhow::bail!("no existing ancestor of {root_part}");
        };
        missing.push(name);
        existing = parent;
    }

    let existing = existing.canonicalize_utf8()?;
    let absolute_root = missing
        .iter()
        .rev()
        .fold(existing.clone(), |acc, name| acc.join(name));

    let escaped = Pattern::escape(absolute_root.as_str());
    let pattern = match suffix_part.as_str() {
        "" => escaped,
        suffix => format!("{escaped}/{suffix}"),
    };

    // A concrete file is matched by its own path, but its parent is watched
    // so that atomic writes are caught.
    let watch_root = if !missing.is_empty() {
        existing
    } else if suffix_part.as_str().is_empty() && absolute_root.is_file() {
        absolute_root
            .parent()
            .unwrap_or(&absolute_root)
            .to_path_buf()
    } else {
        absolute_root
    };

    Ok((watch_root, Pattern::new(&pattern)?))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive. This function sorts the paths and filters
/// out any path that is a subdirectory of a previously accepted path.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
