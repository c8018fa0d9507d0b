use std::fmt::Display;
use std::fs;
use std::io;
use std::time::Instant;

use camino::Utf8Path;
use console::Style;
use indicatif::ProgressStyle;

const ANSI_BLUE: Style = Style::new().blue();

pub(crate) fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Spinner used for the span of a single running task.
pub(crate) fn get_style_task() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Skip-if-newer check: `true` when `target` is missing or older than
/// `source`.
pub(crate) fn is_newer(source: &Utf8Path, target: &Utf8Path) -> io::Result<bool> {
    let target = match fs::metadata(target) {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };

    Ok(fs::metadata(source)?.modified()? > target)
}

/// Deletes a file, treating an absent file as already deleted.
pub(crate) fn remove_file_if_exists(path: &Utf8Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
