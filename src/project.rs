//! Composition root.
//!
//! A [`Project`] owns the configuration, the resolved paths and the optional
//! dev server handle, and assembles the task graph with its three entry
//! points:
//!
//! - `default` (alias `watch`): rebuild styles whenever a SCSS file changes,
//! - `build`: bundle scripts, compile styles, rebuild the sprite and optimize
//!   raster images, one after another,
//! - `serve`: rebuild the sprite and images, then start the dev server and
//!   watch every kind of asset.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::blueprint::{Blueprint, TaskGraph};
use crate::config::{Config, ResolvedPaths};
use crate::engine::{DevServer, Task, WatchBinding, WatchDispatcher, WatchOptions, sequence};
use crate::error::{GraphError, ServerError, TsumikiError};
use crate::loader::{
    Context, HtmlTransform, RasterTransform, ScriptTransform, SpriteTransform, StyleTransform,
    transform_task,
};
use crate::output::OutputJanitor;

/// Entry point rebuilding styles on change.
pub const DEFAULT: &str = "default";
/// Alias of [`DEFAULT`].
pub const WATCH: &str = "watch";
/// Entry point producing every asset once.
pub const BUILD: &str = "build";
/// Entry point serving the output with live reload.
pub const SERVE: &str = "serve";
/// Dev server and watch bindings, the last stage of [`SERVE`].
pub const DEV_LOOP: &str = "dev-loop";

const STARTUP: WatchOptions = WatchOptions {
    trigger_on_startup: true,
};

#[derive(Clone)]
pub struct Project {
    config: Arc<Config>,
    paths: Arc<ResolvedPaths>,
    server: Option<DevServer>,
}

/// Tasks shared between the graph and the watch bindings.
struct Blocks {
    clear_styles: Task,
    styles: Task,
    scripts: Task,
    clear_sprite: Task,
    sprite: Task,
    images: Task,
    html: Task,
}

impl Project {
    pub fn new(config: Config) -> Self {
        let paths = ResolvedPaths::resolve(&config);
        Self {
            config: Arc::new(config),
            paths: Arc::new(paths),
            server: None,
        }
    }

    /// Attaches an already bound dev server.
    pub fn with_server(mut self, server: DevServer) -> Self {
        self.server = Some(server);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn paths(&self) -> &ResolvedPaths {
        &self.paths
    }

    pub fn server(&self) -> Option<&DevServer> {
        self.server.as_ref()
    }

    /// Binds a dev server on the configured address.
    pub async fn bind_server(&self) -> Result<DevServer, ServerError> {
        let host: IpAddr = self
            .config
            .server
            .host
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        DevServer::bind(SocketAddr::new(host, self.config.server.port)).await
    }

    /// Builds the task graph for this project.
    pub fn graph(&self) -> Result<TaskGraph, GraphError> {
        let blocks = self.blocks();

        let mut config = Blueprint::new();
        config
            .add(blocks.clear_styles.clone())?
            .add(blocks.styles.clone())?
            .add(blocks.scripts.clone())?
            .add(blocks.clear_sprite.clone())?
            .add(blocks.sprite.clone())?
            .add(blocks.images.clone())?
            .add(blocks.html.clone())?
            .add(self.watch_styles(&blocks))?
            .add(self.dev_loop(&blocks))?
            .add(
                sequence([
                    Task::call("scripts"),
                    Task::call("styles"),
                    sequence([Task::call("clear-sprite"), Task::call("sprite")]),
                    Task::call("images"),
                ])
                .named(BUILD),
            )?
            .add(
                sequence([
                    sequence([Task::call("clear-sprite"), Task::call("sprite")]),
                    Task::call("images"),
                    Task::call(DEV_LOOP),
                ])
                .named(SERVE),
            )?
            .alias(WATCH, DEFAULT)?;

        config.finish()
    }

    /// Runs the task registered as `name`.
    ///
    /// Serving needs a dev server; one is bound from the configuration when
    /// none is attached.
    pub async fn run(&self, name: &str) -> Result<(), TsumikiError> {
        let project = match (name, &self.server) {
            (SERVE | DEV_LOOP, None) => self.clone().with_server(self.bind_server().await?),
            _ => self.clone(),
        };

        let graph = project.graph()?;
        let task = graph.get(name)?.clone();

        tracing::info!("running '{name}' in {:?} mode", project.config.mode);
        task.run()
            .await
            .map_err(|e| TsumikiError::Task(name.to_string(), e))
    }

    fn context(&self) -> Context {
        let ctx = Context::new(self.config.clone(), self.paths.clone());
        match &self.server {
            Some(server) => ctx.with_server(server.clone()),
            None => ctx,
        }
    }

    fn debounce(&self) -> Duration {
        Duration::from_millis(self.config.watch.debounce_ms)
    }

    fn blocks(&self) -> Blocks {
        let ctx = self.context();

        let paths = self.paths.clone();
        let clear_styles = Task::new("clear-styles", move || {
            let paths = paths.clone();
            async move {
                for path in OutputJanitor::new(&paths).clear_generated_styles()? {
                    tracing::debug!("removed {path}");
                }
                Ok(())
            }
        });

        let paths = self.paths.clone();
        let clear_sprite = Task::new("clear-sprite", move || {
            let paths = paths.clone();
            async move {
                for path in OutputJanitor::new(&paths).clear_generated_sprite()? {
                    tracing::debug!("removed {path}");
                }
                Ok(())
            }
        });

        Blocks {
            clear_styles,
            styles: transform_task("styles", StyleTransform, ctx.clone()),
            scripts: transform_task("scripts", ScriptTransform, ctx.clone()),
            clear_sprite,
            sprite: transform_task("sprite", SpriteTransform, ctx.clone()),
            images: transform_task("images", RasterTransform, ctx.clone()),
            html: transform_task("html", HtmlTransform, ctx),
        }
    }

    /// `default`: a single binding recompiling styles from scratch.
    fn watch_styles(&self, blocks: &Blocks) -> Task {
        let binding = WatchBinding::new(
            [format!("{}/**/*.scss", self.paths.source_styles)],
            sequence([blocks.clear_styles.clone(), blocks.styles.clone()]),
        )
        .options(STARTUP);

        let server = self.server.clone();
        let debounce = self.debounce();

        Task::new(DEFAULT, move || {
            let dispatcher = WatchDispatcher::new(server.clone(), debounce).bind(binding.clone());
            async move {
                dispatcher.run().await?;
                Ok(())
            }
        })
    }

    /// Last stage of `serve`: starts the dev server and watches every kind
    /// of asset, each with its own binding.
    fn dev_loop(&self, blocks: &Blocks) -> Task {
        let paths = &self.paths;
        let images = &paths.source_images;

        let bindings = [
            WatchBinding::new(
                [format!("{}/**/*.scss", paths.source_styles)],
                blocks.styles.clone(),
            )
            .options(STARTUP),
            WatchBinding::new(
                [format!("{}/**/*.html", paths.source_root)],
                blocks.html.clone(),
            )
            .options(STARTUP)
            .reload_viewers(),
            WatchBinding::new(
                [format!("{images}/*.svg")],
                sequence([blocks.clear_sprite.clone(), blocks.sprite.clone()]),
            )
            .reload_viewers(),
            WatchBinding::new(
                [format!("{images}/*.png"), format!("{images}/*.jpg")],
                blocks.images.clone(),
            )
            .reload_viewers(),
            WatchBinding::new(
                [format!("{}/**/*.js", paths.source_scripts)],
                blocks.scripts.clone(),
            )
            .reload_viewers(),
        ];

        let server = self.server.clone();
        let root = paths.output_root.clone();
        let debounce = self.debounce();

        Task::new(DEV_LOOP, move || {
            let server = server.clone();
            let root = root.clone();
            let dispatcher = bindings
                .iter()
                .cloned()
                .fold(WatchDispatcher::new(server.clone(), debounce), WatchDispatcher::bind);

            async move {
                let server = server.context("no dev server attached")?;
                if !server.is_serving() {
                    std::fs::create_dir_all(&root)?;
                    server.start(&root)?;
                }

                dispatcher.run().await?;
                Ok(())
            }
        })
    }
}
