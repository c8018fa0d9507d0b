//! Project configuration and path resolution.
//!
//! A [`Config`] is created once at startup, either from defaults or from a
//! `tsumiki.toml` file, and never mutated afterwards. [`ResolvedPaths`] is
//! derived from it exactly once and handed to every transform.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Name of the environment variable selecting [`Mode::Production`].
pub const ENV_MODE: &str = "TSUMIKI_ENV";

/// Config file looked up in the project root when none is given explicitly.
pub const CONFIG_FILE: &str = "tsumiki.toml";

/// Selects how aggressively outputs are compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Expanded styles, readable bundles, in-place style patching.
    #[default]
    Development,
    /// Compressed styles and minified bundles.
    Production,
}

impl Mode {
    /// Reads the mode from [`ENV_MODE`].
    pub fn from_env() -> Self {
        Self::from_value(std::env::var(ENV_MODE).ok().as_deref())
    }

    pub(crate) fn from_value(value: Option<&str>) -> Self {
        match value {
            Some(value) if value.trim().eq_ignore_ascii_case("production") => Mode::Production,
            _ => Mode::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Mode::Production
    }

    pub(crate) fn output_style(self) -> grass::OutputStyle {
        match self {
            Mode::Development => grass::OutputStyle::Expanded,
            Mode::Production => grass::OutputStyle::Compressed,
        }
    }
}

/// Logical directory and file names, all relative to the project root.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct PathConfig {
    pub src: String,
    pub dist: String,
    pub css: String,
    pub sass: String,
    pub js: String,
    pub images: String,
    pub main_sass_file: String,
    pub main_script_file: String,
    pub svg_sprite_name: String,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            src: "./src".into(),
            dist: "./public".into(),
            css: "css".into(),
            sass: "scss".into(),
            js: "js".into(),
            images: "images".into(),
            main_sass_file: "main.scss".into(),
            main_script_file: "main.js".into(),
            svg_sprite_name: "sprite.svg".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct WatchConfig {
    /// Quiet period before a burst of file events is delivered.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 250 }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ScriptConfig {
    /// Bundler executable, looked up in `PATH` unless absolute.
    pub bundler: String,
    /// Global variable the bundle assigns its exports to.
    pub global_name: String,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            bundler: "esbuild".into(),
            global_name: "app".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ImageConfig {
    pub jpeg_quality: u8,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self { jpeg_quality: 80 }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Project directory every relative path is resolved against.
    #[serde(skip)]
    pub root: Utf8PathBuf,
    /// Resolved from the environment, never from the file.
    #[serde(skip)]
    pub mode: Mode,
    pub paths: PathConfig,
    pub server: ServerConfig,
    pub watch: WatchConfig,
    pub scripts: ScriptConfig,
    pub images: ImageConfig,
}

impl Config {
    /// Default configuration rooted at `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Loads the configuration for the project in `root`.
    ///
    /// An explicit `file` must exist. Without one, `root/tsumiki.toml` is used
    /// when present and the defaults otherwise. The mode always comes from
    /// [`ENV_MODE`].
    pub fn load(root: impl Into<Utf8PathBuf>, file: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let root = root.into();

        let file = match file {
            Some(file) => Some(file.to_path_buf()),
            None => Some(root.join(CONFIG_FILE)).filter(|path| path.is_file()),
        };

        let mut config = match file {
            Some(path) => {
                let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                toml::from_str::<Config>(&text)
                    .map_err(|source| ConfigError::Parse { path, source })?
            }
            None => Config::default(),
        };

        config.root = root;
        config.mode = Mode::from_env();

        Ok(config)
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
}

/// Concrete paths derived from a [`Config`].
///
/// Every path is joined with `/` and normalized, so references generated from
/// these values are the same on every host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub source_root: Utf8PathBuf,
    pub output_root: Utf8PathBuf,
    pub source_styles: Utf8PathBuf,
    pub source_scripts: Utf8PathBuf,
    pub source_images: Utf8PathBuf,
    pub output_styles: Utf8PathBuf,
    pub output_scripts: Utf8PathBuf,
    pub output_images: Utf8PathBuf,
    pub main_style: Utf8PathBuf,
    pub main_script: Utf8PathBuf,
    pub sprite_name: String,
}

impl ResolvedPaths {
    pub fn resolve(config: &Config) -> Self {
        let root = config.root.as_str();
        let paths = &config.paths;

        let source_root = posix_join([root, &paths.src]);
        let output_root = posix_join([root, &paths.dist]);
        let source_styles = posix_join([source_root.as_str(), &paths.sass]);
        let source_scripts = posix_join([source_root.as_str(), &paths.js]);

        Self {
            main_style: posix_join([source_styles.as_str(), &paths.main_sass_file]),
            main_script: posix_join([source_scripts.as_str(), &paths.main_script_file]),
            source_images: posix_join([source_root.as_str(), &paths.images]),
            output_styles: posix_join([output_root.as_str(), &paths.css]),
            output_scripts: posix_join([output_root.as_str(), &paths.js]),
            output_images: posix_join([output_root.as_str(), &paths.images]),
            sprite_name: paths.svg_sprite_name.clone(),
            source_root,
            output_root,
            source_styles,
            source_scripts,
        }
    }

    /// Web path of a file inside the output root, e.g. `/css/main.css`.
    pub fn href(&self, path: &Utf8Path) -> Option<String> {
        let relative = path.strip_prefix(&self.output_root).ok()?;
        Some(format!("/{}", posix_join([relative.as_str()])))
    }
}

/// Joins path segments with `/`, dropping `.` and folding `..`.
///
/// Backslashes in the input are treated as separators. A leading `/` on the
/// first segment is kept, leading `..` segments of relative paths are kept.
pub fn posix_join<'a>(parts: impl IntoIterator<Item = &'a str>) -> Utf8PathBuf {
    let mut absolute = false;
    let mut stack: Vec<&str> = Vec::new();

    for (i, part) in parts.into_iter().enumerate() {
        if i == 0 && part.starts_with(['/', '\\']) {
            absolute = true;
        }

        for segment in part.split(['/', '\\']) {
            match segment {
                "" | "." => {}
                ".." => match stack.last() {
                    Some(&last) if last != ".." => {
                        stack.pop();
                    }
                    _ if absolute => {}
                    _ => stack.push(".."),
                },
                segment => stack.push(segment),
            }
        }
    }

    let joined = stack.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => Utf8PathBuf::from(format!("/{joined}")),
        (false, true) => Utf8PathBuf::from("."),
        (false, false) => Utf8PathBuf::from(joined),
    }
}
