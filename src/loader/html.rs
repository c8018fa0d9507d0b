use std::fs;

use camino::Utf8PathBuf;
use glob::glob;

use super::{AssetKind, AssetTransform, Context, TransformResult};
use crate::engine::runner::http::CLIENT_PATH;
use crate::error::TransformError;
use crate::output::write_output;

/// Copies the HTML pages of the source tree into the output root.
///
/// While a dev server is attached, every page also loads the live reload
/// client.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlTransform;

impl AssetTransform for HtmlTransform {
    fn kind(&self) -> AssetKind {
        AssetKind::Html
    }

    fn run(&self, ctx: &Context) -> Result<TransformResult, TransformError> {
        let root = &ctx.paths.source_root;
        let pattern = format!("{}/**/*.html", glob::Pattern::escape(root.as_str()));

        let mut written = Vec::new();
        for entry in glob(&pattern)? {
            let source = Utf8PathBuf::try_from(entry?)?;
            if !source.is_file() {
                continue;
            }

            let Ok(relative) = source.strip_prefix(root) else {
                continue;
            };

            let target = ctx.paths.output_root.join(relative);
            let page = fs::read_to_string(&source)?;
            let page = match ctx.server {
                Some(_) => inject_client(&page),
                None => page,
            };

            write_output(&target, page)?;
            written.push(target);
        }

        Ok(TransformResult::Written(written))
    }
}

/// Adds the live reload client before `</body>`, or at the end of the page.
fn inject_client(page: &str) -> String {
    let tag = format!(r#"<script src="{CLIENT_PATH}"></script>"#);

    match page.rfind("</body>") {
        Some(index) => {
            let mut page = page.to_string();
            page.insert_str(index, &tag);
            page
        }
        None => format!("{page}{tag}"),
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::config::Mode;
    use crate::engine::DevServer;
    use crate::loader::fixture::Fixture;

    #[test]
    fn test_inject_before_body_end() {
        assert_eq!(
            inject_client("<body><p>hi</p></body>\n"),
            format!(r#"<body><p>hi</p><script src="{CLIENT_PATH}"></script></body>"#) + "\n"
        );
        assert_eq!(
            inject_client("<p>hi</p>"),
            format!(r#"<p>hi</p><script src="{CLIENT_PATH}"></script>"#)
        );
    }

    #[test]
    fn test_copies_pages_verbatim() {
        let fixture = Fixture::new(Mode::Development);
        let source = &fixture.paths.source_root;
        fixture.write(&source.join("index.html"), "<body></body>");
        fixture.write(&source.join("blog/post.html"), "<body>post</body>");
        fixture.write(&source.join("scss/main.scss"), ".a {}");

        let TransformResult::Written(mut written) = HtmlTransform.run(&fixture.context()).unwrap() else {
            panic!("expected written files");
        };
        written.sort();

        let output = &fixture.paths.output_root;
        assert_eq!(written, [output.join("blog/post.html"), output.join("index.html")]);
        assert_eq!(
            fs::read_to_string(output.join("blog/post.html")).unwrap(),
            "<body>post</body>"
        );
    }

    #[tokio::test]
    async fn test_injects_client_when_serving() {
        let fixture = Fixture::new(Mode::Development);
        fixture.write(&fixture.paths.source_root.join("index.html"), "<body></body>");

        let server = DevServer::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        HtmlTransform
            .run(&fixture.context().with_server(server))
            .unwrap();

        let page = fs::read_to_string(fixture.paths.output_root.join("index.html")).unwrap();
        assert!(page.contains(CLIENT_PATH));
    }
}
