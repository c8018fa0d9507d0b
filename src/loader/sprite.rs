use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use glob::glob;
use regex::{Captures, Regex};

use super::{AssetKind, AssetTransform, Context, Failure, TransformResult};
use crate::config::posix_join;
use crate::error::TransformError;
use crate::output::write_output;
use crate::utils::is_newer;

static ROOT_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<svg\b([^>]*?)(/?)>").expect("valid regex"));

static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Za-z_:][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex"));

static INNER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\s)id\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex"));

static URL_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"url\(\s*(['"]?)#([^)'"\s]+)['"]?\s*\)"#).expect("valid regex"));

static HREF_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r##"(\s(?:xlink:)?href)\s*=\s*(?:"#([^"]*)"|'#([^']*)')"##).expect("valid regex")
});

/// Attributes of an icon's root element carried over to its nested `<svg>`.
const KEPT_ATTRIBUTES: &[&str] = &[
    "viewBox",
    "preserveAspectRatio",
    "fill",
    "fill-rule",
    "fill-opacity",
    "stroke",
    "stroke-width",
    "stroke-linecap",
    "stroke-linejoin",
    "stroke-miterlimit",
    "stroke-dasharray",
    "stroke-opacity",
    "opacity",
    "color",
    "style",
];

/// Only the icon named in the URL fragment is displayed.
const STACK_STYLE: &str = "<style>:root>svg{display:none}:root>svg:target{display:inline}</style>";

/// Merges the SVG icons at the top of the source images directory into a
/// single "stack" sprite.
///
/// Each icon is nested as `<svg id="<file stem>">`, so `sprite.svg#name`
/// shows exactly that icon.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpriteTransform;

impl AssetTransform for SpriteTransform {
    fn kind(&self) -> AssetKind {
        AssetKind::VectorSprite
    }

    fn run(&self, ctx: &Context) -> Result<TransformResult, TransformError> {
        let target = sprite_output(ctx);

        let pattern = format!(
            "{}/*.svg",
            glob::Pattern::escape(ctx.paths.source_images.as_str())
        );

        let mut icons = Vec::new();
        for entry in glob(&pattern)? {
            let path = Utf8PathBuf::try_from(entry?)?;
            if path.is_file() {
                icons.push(path);
            }
        }

        if icons.is_empty() {
            return Ok(TransformResult::Written(vec![]));
        }

        let mut stale = false;
        for icon in &icons {
            if is_newer(icon, &target)? {
                stale = true;
                break;
            }
        }

        if !stale {
            return Ok(TransformResult::Written(vec![]));
        }

        icons.sort_by(|a, b| a.file_stem().cmp(&b.file_stem()));

        let mut sprite = String::from(
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">"#,
        );
        sprite.push_str(STACK_STYLE);

        let mut failures = Vec::new();
        let mut count = 0;
        for icon in &icons {
            match nest(icon) {
                Ok(nested) => {
                    sprite.push_str(&nested);
                    count += 1;
                }
                Err(detail) => {
                    tracing::warn!("skipping icon {icon}: {detail}");
                    failures.push(format!("{icon}: {detail}"));
                }
            }
        }

        if count == 0 {
            return Ok(TransformResult::Failed(Failure::tool(failures.join("\n"))));
        }

        sprite.push_str("</svg>\n");
        write_output(&target, sprite)?;

        Ok(TransformResult::Written(vec![target]))
    }
}

/// Path of the generated sprite.
///
/// The sprite is addressed relative to the per-icon `stack` directory, the
/// result is the sprite name inside the output images directory.
pub fn sprite_output(ctx: &Context) -> Utf8PathBuf {
    let stack = format!("{}/stack", ctx.paths.output_images);
    let sprite = format!("../{}", ctx.paths.sprite_name);
    posix_join([stack.as_str(), sprite.as_str()])
}

/// Rewrites the icon at `path` as a nested `<svg>` element.
fn nest(path: &Utf8Path) -> Result<String, String> {
    let id = path.file_stem().ok_or("icon has no file name")?;
    let text = fs::read_to_string(path).map_err(|e| e.to_string())?;

    let open = ROOT_OPEN
        .captures(&text)
        .ok_or("no <svg> root element")?;
    let whole = open.get(0).ok_or("no <svg> root element")?;
    let attributes = open.get(1).map_or("", |m| m.as_str());
    let self_closing = open.get(2).is_some_and(|m| !m.as_str().is_empty());

    let body = if self_closing {
        ""
    } else {
        let end = text.rfind("</svg>").ok_or("unclosed <svg> root element")?;
        if end < whole.end() {
            return Err("unclosed <svg> root element".into());
        }
        text[whole.end()..end].trim()
    };

    let mut nested = format!(r#"<svg id="{}""#, escape_attribute(id));
    for attribute in ATTRIBUTE.captures_iter(attributes) {
        let name = &attribute[1];
        if !KEPT_ATTRIBUTES.contains(&name) {
            continue;
        }

        let value = attribute
            .get(2)
            .or_else(|| attribute.get(3))
            .map_or("", |m| m.as_str());
        nested.push_str(&format!(r#" {name}="{}""#, escape_attribute(value)));
    }
    nested.push('>');
    nested.push_str(&namespace_ids(body, id));
    nested.push_str("</svg>");

    Ok(nested)
}

/// Prefixes every id defined inside an icon body with the icon name, and
/// rewrites local references to match.
fn namespace_ids(body: &str, icon: &str) -> String {
    let scoped = |name: &str| escape_attribute(&format!("{icon}_{name}"));

    let body = INNER_ID.replace_all(body, |caps: &Captures| {
        let name = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        format!(r#"{}id="{}""#, &caps[1], scoped(name))
    });

    let body = URL_REFERENCE.replace_all(&body, |caps: &Captures| {
        format!("url({quote}#{}{quote})", scoped(&caps[2]), quote = &caps[1])
    });

    let body = HREF_REFERENCE.replace_all(&body, |caps: &Captures| {
        let name = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        format!(r##"{}="#{}""##, &caps[1], scoped(name))
    });

    body.into_owned()
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}
