use std::fs;
use std::process::{Command, Stdio};

use camino::Utf8PathBuf;

use super::{AssetKind, AssetTransform, Context, Failure, TransformResult};
use crate::error::TransformError;

/// Bundles the main script entry with an external bundler.
///
/// The bundle is a single immediately-invoked script exposing the configured
/// global name, with a linked source map next to it. Production mode also
/// minifies.
///
/// **Note:** the bundler executable (`esbuild` by default) has to be available
/// in the system PATH.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptTransform;

impl AssetTransform for ScriptTransform {
    fn kind(&self) -> AssetKind {
        AssetKind::Script
    }

    fn run(&self, ctx: &Context) -> Result<TransformResult, TransformError> {
        let entry = &ctx.paths.main_script;
        if let Err(source) = fs::metadata(entry) {
            return Err(TransformError::MissingEntry {
                path: entry.clone(),
                source,
            });
        }

        let outfile = script_output(ctx);
        if let Some(dir) = outfile.parent() {
            fs::create_dir_all(dir)?;
        }

        let program = &ctx.config.scripts.bundler;
        let mut command = Command::new(program);
        command
            .arg(entry.as_str())
            .arg("--bundle")
            .arg("--format=iife")
            .arg(format!("--global-name={}", ctx.config.scripts.global_name))
            .arg("--sourcemap=linked")
            .arg(format!("--outfile={outfile}"));

        if ctx.mode().is_production() {
            command.arg("--minify");
        }

        let output = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| TransformError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            let detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Ok(TransformResult::Failed(Failure::compile(detail)));
        }

        let mut written = vec![outfile.clone()];
        let map = Utf8PathBuf::from(format!("{outfile}.map"));
        if map.exists() {
            written.push(map);
        }

        Ok(TransformResult::Written(written))
    }
}

/// Path the script transform writes the bundle to.
pub fn script_output(ctx: &Context) -> Utf8PathBuf {
    let name = ctx.paths.main_script.file_name().unwrap_or("main.js");
    ctx.paths.output_scripts.join(name)
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;

    use super::*;
    use crate::config::{Config, Mode};
    use crate::loader::FailureKind;
    use crate::loader::fixture::Fixture;

    /// Stands in for the bundler: records its arguments next to the output
    /// and copies the entry to `--outfile`. Entries containing `syntax error`
    /// are rejected.
    const FAKE_BUNDLER: &str = r#"#!/bin/sh
entry="$1"
for arg in "$@"; do
  case "$arg" in
    --outfile=*) out="${arg#--outfile=}" ;;
  esac
done
if grep -q "syntax error" "$entry"; then
  echo "$entry:1:0: ERROR: Unexpected token" >&2
  exit 1
fi
cp "$entry" "$out"
echo "$@" > "$out.args"
"#;

    fn with_bundler(fixture: &Fixture) -> crate::loader::Context {
        let bundler = fixture.root.join("fake-bundler.sh");
        fs::write(&bundler, FAKE_BUNDLER).unwrap();
        fs::set_permissions(&bundler, fs::Permissions::from_mode(0o755)).unwrap();

        let mut config: Config = (*fixture.config).clone();
        config.scripts.bundler = bundler.to_string();

        let mut ctx = fixture.context();
        ctx.config = Arc::new(config);
        ctx
    }

    #[test]
    fn test_bundles_main_entry() {
        let fixture = Fixture::new(Mode::Production);
        fixture.write(&fixture.paths.main_script, "console.log('hi');\n");
        let ctx = with_bundler(&fixture);

        let result = ScriptTransform.run(&ctx).unwrap();
        let outfile = script_output(&ctx);
        assert_eq!(result, TransformResult::Written(vec![outfile.clone()]));
        assert_eq!(fs::read_to_string(&outfile).unwrap(), "console.log('hi');\n");

        let args = fs::read_to_string(format!("{outfile}.args")).unwrap();
        assert!(args.contains("--bundle"));
        assert!(args.contains("--format=iife"));
        assert!(args.contains("--global-name=app"));
        assert!(args.contains("--minify"));
    }

    #[test]
    fn test_development_is_not_minified() {
        let fixture = Fixture::new(Mode::Development);
        fixture.write(&fixture.paths.main_script, "console.log('hi');\n");
        let ctx = with_bundler(&fixture);

        ScriptTransform.run(&ctx).unwrap();

        let args = fs::read_to_string(format!("{}.args", script_output(&ctx))).unwrap();
        assert!(!args.contains("--minify"));
    }

    #[test]
    fn test_bundler_error_is_compile_failure() {
        let fixture = Fixture::new(Mode::Development);
        fixture.write(&fixture.paths.main_script, "syntax error\n");
        let ctx = with_bundler(&fixture);

        let TransformResult::Failed(failure) = ScriptTransform.run(&ctx).unwrap() else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::Compile);
        assert!(failure.detail.contains("Unexpected token"));
    }

    #[test]
    fn test_missing_bundler_is_fatal() {
        let fixture = Fixture::new(Mode::Development);
        fixture.write(&fixture.paths.main_script, "console.log('hi');\n");

        let mut config: Config = (*fixture.config).clone();
        config.scripts.bundler = fixture.root.join("no-such-bundler").to_string();
        let mut ctx = fixture.context();
        ctx.config = Arc::new(config);

        assert!(matches!(
            ScriptTransform.run(&ctx),
            Err(TransformError::Spawn { .. })
        ));
    }

    #[test]
    fn test_missing_entry_is_fatal() {
        let fixture = Fixture::new(Mode::Development);
        let ctx = with_bundler(&fixture);

        assert!(matches!(
            ScriptTransform.run(&ctx),
            Err(TransformError::MissingEntry { .. })
        ));
    }
}
