use std::fs;

use camino::Utf8PathBuf;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};

use super::{AssetKind, AssetTransform, Context, Failure, TransformResult};
use crate::engine::Notification;
use crate::error::TransformError;
use crate::output::write_output;

/// Compiles the main SCSS entry and post-processes the result.
///
/// `grass` compiles the entry with the output style selected by the mode,
/// then `lightningcss` adds vendor prefixes, merges rules and strips
/// comments. Whitespace is only minified in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct StyleTransform;

impl AssetTransform for StyleTransform {
    fn kind(&self) -> AssetKind {
        AssetKind::Style
    }

    fn run(&self, ctx: &Context) -> Result<TransformResult, TransformError> {
        let entry = &ctx.paths.main_style;
        if let Err(source) = fs::metadata(entry) {
            return Err(TransformError::MissingEntry {
                path: entry.clone(),
                source,
            });
        }

        let options = grass::Options::default()
            .style(ctx.mode().output_style())
            .load_path(ctx.paths.source_styles.as_std_path());

        let css = match grass::from_path(entry.as_std_path(), &options) {
            Ok(css) => css,
            Err(e) => return Ok(TransformResult::Failed(Failure::compile(e.to_string()))),
        };

        let css = match post_process(&css, ctx.mode().is_production()) {
            Ok(css) => css,
            Err(detail) => return Ok(TransformResult::Failed(Failure::tool(detail))),
        };

        let path = style_output(ctx);
        write_output(&path, css)?;

        if !ctx.mode().is_production()
            && let Some(server) = &ctx.server
            && let Some(href) = ctx.paths.href(&path)
        {
            server.notify(Notification::Style { href });
        }

        Ok(TransformResult::Written(vec![path]))
    }
}

fn targets() -> Targets {
    let browsers = Browsers {
        chrome: Some(80 << 16),
        edge: Some(88 << 16),
        firefox: Some(78 << 16),
        safari: Some(13 << 16),
        ios_saf: Some(13 << 16),
        ..Browsers::default()
    };

    Targets {
        browsers: Some(browsers),
        ..Targets::default()
    }
}

/// Prefixes and minifies compiled CSS.
fn post_process(css: &str, minify: bool) -> Result<String, String> {
    let targets = targets();

    let mut sheet = StyleSheet::parse(css, ParserOptions::default()).map_err(|e| e.to_string())?;

    sheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|e| e.to_string())?;

    let result = sheet
        .to_css(PrinterOptions {
            minify,
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|e| e.to_string())?;

    Ok(result.code)
}

/// Path the style transform writes to.
pub fn style_output(ctx: &Context) -> Utf8PathBuf {
    let stem = ctx.paths.main_style.file_stem().unwrap_or("main");
    ctx.paths.output_styles.join(format!("{stem}.css"))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::config::Mode;
    use crate::engine::DevServer;
    use crate::loader::FailureKind;
    use crate::loader::fixture::Fixture;

    const SOURCE: &str = "@use 'partial';\n/* note */\n.a { display: block; }\n";
    const PARTIAL: &str = ".b { color: red; }\n";

    fn seed(fixture: &Fixture) {
        fixture.write(&fixture.paths.main_style, SOURCE);
        fixture.write(&fixture.paths.source_styles.join("_partial.scss"), PARTIAL);
    }

    #[test]
    fn test_production_output_is_minified() {
        let fixture = Fixture::new(Mode::Production);
        seed(&fixture);

        let result = StyleTransform.run(&fixture.context()).unwrap();
        let path = style_output(&fixture.context());
        assert_eq!(result, TransformResult::Written(vec![path.clone()]));

        let css = fs::read_to_string(&path).unwrap();
        assert!(css.contains(".a{display:block}"), "{css}");
        assert!(css.contains(".b{color:red}"), "{css}");
        assert!(!css.contains("note"));
    }

    #[test]
    fn test_development_output_is_readable() {
        let fixture = Fixture::new(Mode::Development);
        seed(&fixture);

        StyleTransform.run(&fixture.context()).unwrap();

        let css = fs::read_to_string(style_output(&fixture.context())).unwrap();
        assert!(css.contains("display: block"), "{css}");
        assert!(!css.contains("note"));
    }

    #[test]
    fn test_compile_error_writes_nothing() {
        let fixture = Fixture::new(Mode::Development);
        fixture.write(&fixture.paths.main_style, ".a { display: block;\n");

        let result = StyleTransform.run(&fixture.context()).unwrap();
        assert!(matches!(
            result,
            TransformResult::Failed(Failure {
                kind: FailureKind::Compile,
                ..
            })
        ));
        assert!(!style_output(&fixture.context()).exists());
    }

    #[test]
    fn test_missing_entry_is_fatal() {
        let fixture = Fixture::new(Mode::Development);

        assert!(matches!(
            StyleTransform.run(&fixture.context()),
            Err(TransformError::MissingEntry { .. })
        ));
    }

    #[tokio::test]
    async fn test_patch_published_in_development() {
        let fixture = Fixture::new(Mode::Development);
        seed(&fixture);

        let server = DevServer::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let mut rx = server.subscribe();

        StyleTransform
            .run(&fixture.context().with_server(server))
            .unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::Style {
                href: "/css/main.css".into()
            }
        );
    }

    #[tokio::test]
    async fn test_no_patch_in_production() {
        let fixture = Fixture::new(Mode::Production);
        seed(&fixture);

        let server = DevServer::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let mut rx = server.subscribe();

        StyleTransform
            .run(&fixture.context().with_server(server))
            .unwrap();

        assert!(rx.try_recv().is_err());
    }
}
