//! Lifecycle of generated files in the output tree.
//!
//! The [`OutputJanitor`] removes stale artifacts before they are regenerated.
//! It only ever deletes inside the output root, and deleting something that
//! is already gone is not an error.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use glob::glob;

use crate::config::ResolvedPaths;
use crate::error::TransformError;
use crate::utils::remove_file_if_exists;

/// Removes generated stylesheets and the generated sprite.
#[derive(Debug, Clone)]
pub struct OutputJanitor<'a> {
    paths: &'a ResolvedPaths,
}

impl<'a> OutputJanitor<'a> {
    pub fn new(paths: &'a ResolvedPaths) -> Self {
        Self { paths }
    }

    /// Deletes every `*.css` file in the output styles directory.
    pub fn clear_generated_styles(&self) -> Result<Vec<Utf8PathBuf>, TransformError> {
        let pattern = format!(
            "{}/*.css",
            glob::Pattern::escape(self.paths.output_styles.as_str())
        );

        let mut removed = Vec::new();
        for entry in glob(&pattern)? {
            let path = Utf8PathBuf::try_from(entry?)?;
            if path.is_file() && remove_file_if_exists(&path)? {
                removed.push(path);
            }
        }

        Ok(removed)
    }

    /// Deletes the generated sprite from the output images directory.
    pub fn clear_generated_sprite(&self) -> Result<Vec<Utf8PathBuf>, TransformError> {
        let path = self.paths.output_images.join(&self.paths.sprite_name);

        match remove_file_if_exists(&path)? {
            true => Ok(vec![path]),
            false => Ok(vec![]),
        }
    }
}

/// Writes `data` to `path`, creating missing parent directories.
pub(crate) fn write_output(path: &Utf8Path, data: impl AsRef<[u8]>) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    fs::write(path, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn fixture() -> (tempfile::TempDir, ResolvedPaths) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let paths = ResolvedPaths::resolve(&Config::new(root));
        (dir, paths)
    }

    #[test]
    fn test_clear_styles_is_idempotent() {
        let (_dir, paths) = fixture();
        write_output(&paths.output_styles.join("main.css"), "a{}").unwrap();
        write_output(&paths.output_styles.join("print.css"), "b{}").unwrap();
        write_output(&paths.output_styles.join("keep.txt"), "c").unwrap();

        let janitor = OutputJanitor::new(&paths);

        let first = janitor.clear_generated_styles().unwrap();
        assert_eq!(first.len(), 2);

        let second = janitor.clear_generated_styles().unwrap();
        assert!(second.is_empty());

        assert!(!paths.output_styles.join("main.css").exists());
        assert!(paths.output_styles.join("keep.txt").exists());
    }

    #[test]
    fn test_clear_styles_missing_directory() {
        let (_dir, paths) = fixture();
        let removed = OutputJanitor::new(&paths).clear_generated_styles().unwrap();
        assert!(removed.is_empty());
    }

    #[test]
    fn test_clear_sprite_is_idempotent() {
        let (_dir, paths) = fixture();
        let sprite = paths.output_images.join("sprite.svg");
        let other = paths.output_images.join("logo.svg");
        write_output(&sprite, "<svg/>").unwrap();
        write_output(&other, "<svg/>").unwrap();

        let janitor = OutputJanitor::new(&paths);
        assert_eq!(janitor.clear_generated_sprite().unwrap(), vec![sprite.clone()]);
        assert!(janitor.clear_generated_sprite().unwrap().is_empty());

        assert!(!sprite.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_never_touches_sources() {
        let (_dir, paths) = fixture();
        let source = paths.source_styles.join("main.css");
        write_output(&source, "a{}").unwrap();

        OutputJanitor::new(&paths).clear_generated_styles().unwrap();
        assert!(source.exists());
    }
}
