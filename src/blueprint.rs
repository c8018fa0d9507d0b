use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::engine::{Kind, Task, TaskResult};
use crate::error::GraphError;

/// The blueprint for your asset pipeline.
///
/// `Blueprint` collects named tasks. Tasks may refer to each other by name
/// with [`Task::call`]; the references are checked and resolved when the
/// blueprint is turned into a [`TaskGraph`].
///
/// # Example
///
/// ```rust,no_run
/// use tsumiki::{Blueprint, Task, sequence};
///
/// let mut config = Blueprint::new();
/// config.add(Task::new("styles", || async { Ok(()) }))?;
/// config.add(sequence([Task::call("styles")]).named("build"))?;
/// let graph = config.finish()?;
/// # Ok::<(), tsumiki::GraphError>(())
/// ```
#[derive(Default)]
pub struct Blueprint {
    graph: Graph<Task, ()>,
    names: HashMap<Cow<'static, str>, NodeIndex>,
    aliases: BTreeMap<String, String>,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `task` under its own name. Names are unique.
    pub fn add(&mut self, task: Task) -> Result<&mut Self, GraphError> {
        let name = Cow::Owned(task.name().to_string());
        if self.names.contains_key(&name) || self.aliases.contains_key(name.as_ref()) {
            return Err(GraphError::Duplicate(name.into_owned()));
        }

        let index = self.graph.add_node(task);
        self.names.insert(name, index);
        Ok(self)
    }

    /// Makes `target` invokable as `alias` too.
    pub fn alias(&mut self, alias: impl Into<String>, target: impl Into<String>) -> Result<&mut Self, GraphError> {
        let alias = alias.into();
        if self.names.contains_key(alias.as_str()) || self.aliases.contains_key(&alias) {
            return Err(GraphError::Duplicate(alias));
        }

        self.aliases.insert(alias, target.into());
        Ok(self)
    }

    /// Checks every reference, rejects cycles and inlines referenced tasks.
    pub fn finish(mut self) -> Result<TaskGraph, GraphError> {
        for index in self.graph.node_indices().collect::<Vec<_>>() {
            let mut called = Vec::new();
            collect_calls(&self.graph[index], &mut called);

            for name in called {
                let dependency = *self.names.get(name.as_str()).ok_or_else(|| GraphError::Unknown {
                    referrer: self.graph[index].name().to_string(),
                    name: name.clone(),
                })?;
                self.graph.add_edge(dependency, index, ());
            }
        }

        for (alias, target) in &self.aliases {
            if !self.names.contains_key(target.as_str()) {
                return Err(GraphError::Unknown {
                    referrer: alias.clone(),
                    name: target.clone(),
                });
            }
        }

        // Dependencies come first, so every reference is already resolved by
        // the time it is inlined.
        let order = petgraph::algo::toposort(&self.graph, None)
            .map_err(|cycle| GraphError::Cycle(self.graph[cycle.node_id()].name().to_string()))?;

        let mut resolved: HashMap<String, Task> = HashMap::new();
        for index in order {
            let mut task = self.graph[index].clone();
            inline_calls(&mut task, &resolved);
            resolved.insert(task.name().to_string(), task);
        }

        Ok(TaskGraph {
            tasks: resolved.into_iter().collect(),
            aliases: self.aliases,
        })
    }
}

fn collect_calls(task: &Task, acc: &mut Vec<String>) {
    match task.kind() {
        Kind::Call(name) => acc.push(name.to_string()),
        Kind::Sequence(tasks) | Kind::Concurrent(tasks) => {
            for task in tasks {
                collect_calls(task, acc);
            }
        }
        Kind::Unit(_) => {}
    }
}

fn inline_calls(task: &mut Task, resolved: &HashMap<String, Task>) {
    let replacement = match task.kind_mut() {
        Kind::Call(name) => resolved.get(name.as_ref()).cloned(),
        Kind::Sequence(tasks) | Kind::Concurrent(tasks) => {
            for task in tasks {
                inline_calls(task, resolved);
            }
            None
        }
        Kind::Unit(_) => None,
    };

    if let Some(replacement) = replacement {
        *task = replacement;
    }
}

/// A finished set of named, fully resolved tasks.
pub struct TaskGraph {
    tasks: BTreeMap<String, Task>,
    aliases: BTreeMap<String, String>,
}

impl TaskGraph {
    /// Looks up a task by name or alias.
    pub fn get(&self, name: &str) -> Result<&Task, GraphError> {
        let name = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        self.tasks
            .get(name)
            .ok_or_else(|| GraphError::NotFound(name.to_string()))
    }

    /// Runs the task registered as `name`.
    pub async fn run(&self, name: &str) -> TaskResult {
        let task = self.get(name)?.clone();
        task.run().await
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }
}

impl fmt::Display for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for task in self.tasks.values() {
            write!(f, "{task}")?;
        }

        for (alias, target) in &self.aliases {
            writeln!(f, "{alias} = {target}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::engine::sequence;

    fn noop(name: &'static str) -> Task {
        Task::new(name, || async { Ok(()) })
    }

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Task {
        let log = log.clone();
        Task::new(name, move || {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(name);
                Ok(())
            }
        })
    }

    #[test]
    fn test_duplicate_name() {
        let mut config = Blueprint::new();
        config.add(noop("styles")).unwrap();

        assert_eq!(
            config.add(noop("styles")).err(),
            Some(GraphError::Duplicate("styles".into()))
        );
        assert_eq!(
            config.alias("styles", "styles").err(),
            Some(GraphError::Duplicate("styles".into()))
        );
    }

    #[test]
    fn test_unknown_reference() {
        let mut config = Blueprint::new();
        config
            .add(sequence([Task::call("ghost")]).named("build"))
            .unwrap();

        assert_eq!(
            config.finish().err(),
            Some(GraphError::Unknown {
                referrer: "build".into(),
                name: "ghost".into()
            })
        );
    }

    #[test]
    fn test_unknown_alias_target() {
        let mut config = Blueprint::new();
        config.alias("watch", "default").unwrap();

        assert!(matches!(config.finish(), Err(GraphError::Unknown { .. })));
    }

    #[test]
    fn test_cycle() {
        let mut config = Blueprint::new();
        config.add(sequence([Task::call("b")]).named("a")).unwrap();
        config.add(sequence([Task::call("a")]).named("b")).unwrap();

        assert!(matches!(config.finish(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_not_found() {
        let graph = Blueprint::new().finish().unwrap();
        assert_eq!(
            graph.get("build").err(),
            Some(GraphError::NotFound("build".into()))
        );
    }

    #[tokio::test]
    async fn test_references_are_inlined() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut config = Blueprint::new();
        config
            .add(sequence([Task::call("clear"), Task::call("styles")]).named("default"))
            .unwrap()
            .add(recording(&log, "clear"))
            .unwrap()
            .add(recording(&log, "styles"))
            .unwrap()
            .alias("watch", "default")
            .unwrap();

        let graph = config.finish().unwrap();
        graph.run("watch").await.unwrap();
        graph.run("styles").await.unwrap();

        assert_eq!(*log.lock().unwrap(), ["clear", "styles", "styles"]);
        assert_eq!(
            graph.names().collect::<Vec<_>>(),
            ["clear", "default", "styles"]
        );
    }

    #[test]
    fn test_display() {
        let mut config = Blueprint::new();
        config
            .add(noop("styles"))
            .unwrap()
            .add(sequence([Task::call("styles")]).named("build"))
            .unwrap()
            .alias("b", "build")
            .unwrap();

        let text = config.finish().unwrap().to_string();
        assert_eq!(text, "build (sequence)\n  styles\nstyles\nb = build\n");
    }
}
