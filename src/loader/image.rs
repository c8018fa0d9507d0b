use std::fs;
use std::io::Cursor;

use camino::{Utf8Path, Utf8PathBuf};
use glob::glob;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageReader};
use rayon::prelude::*;
use thiserror::Error;

use super::{AssetKind, AssetTransform, Context, Failure, TransformResult};
use crate::error::TransformError;
use crate::output::write_output;
use crate::utils::is_newer;

/// Errors that can occur while optimizing a single image.
#[derive(Debug, Error)]
enum ImageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Png,
    Jpeg,
}

impl Format {
    const ALL: [(Format, &'static str); 2] = [(Format::Png, "png"), (Format::Jpeg, "jpg")];
}

/// Re-encodes the PNG and JPEG files at the top of the source images
/// directory into the output images directory.
///
/// Files are only reprocessed when the source is newer than the output.
/// The re-encoded image is kept only if it is smaller than the source,
/// otherwise the source bytes are copied.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterTransform;

impl AssetTransform for RasterTransform {
    fn kind(&self) -> AssetKind {
        AssetKind::RasterImage
    }

    fn run(&self, ctx: &Context) -> Result<TransformResult, TransformError> {
        let paths = &ctx.paths;
        let quality = ctx.config.images.jpeg_quality.clamp(1, 100);

        let mut pending = Vec::new();
        for (format, ext) in Format::ALL {
            let pattern = format!(
                "{}/*.{ext}",
                glob::Pattern::escape(paths.source_images.as_str())
            );

            for entry in glob(&pattern)? {
                let source = Utf8PathBuf::try_from(entry?)?;
                if !source.is_file() {
                    continue;
                }

                let Some(name) = source.file_name() else {
                    continue;
                };

                let target = paths.output_images.join(name);
                if is_newer(&source, &target)? {
                    pending.push((format, source, target));
                }
            }
        }

        let outcomes: Vec<_> = pending
            .into_par_iter()
            .map(|(format, source, target)| {
                let outcome = optimize(format, quality, &source, &target);
                (source, target, outcome)
            })
            .collect();

        let mut written = Vec::new();
        let mut failures = Vec::new();
        for (source, target, outcome) in outcomes {
            match outcome {
                Ok(()) => written.push(target),
                Err(e) => {
                    tracing::warn!("skipping {source}: {e}");
                    failures.push(format!("{source}: {e}"));
                }
            }
        }

        if written.is_empty() && !failures.is_empty() {
            return Ok(TransformResult::Failed(Failure::tool(failures.join("\n"))));
        }

        Ok(TransformResult::Written(written))
    }
}

fn optimize(format: Format, quality: u8, source: &Utf8Path, target: &Utf8Path) -> Result<(), ImageError> {
    let original = fs::read(source)?;
    let img = ImageReader::new(Cursor::new(&original))
        .with_guessed_format()?
        .decode()?;

    let mut encoded = Vec::new();
    match format {
        Format::Png => {
            let encoder = PngEncoder::new_with_quality(
                &mut encoded,
                CompressionType::Best,
                FilterType::Adaptive,
            );
            encoder.write_image(img.as_bytes(), img.width(), img.height(), img.color().into())?;
        }
        Format::Jpeg => {
            let rgb = img.to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut encoded, quality);
            encoder.write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)?;
        }
    }

    if encoded.len() < original.len() {
        write_output(target, encoded)?;
    } else {
        write_output(target, original)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use image::{Rgb, RgbImage};

    use super::*;
    use crate::config::Mode;
    use crate::loader::fixture::Fixture;

    fn gradient(path: &Utf8Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 128]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_optimizes_top_level_images() {
        let fixture = Fixture::new(Mode::Development);
        let images = &fixture.paths.source_images;
        gradient(&images.join("a.png"));
        gradient(&images.join("b.jpg"));
        gradient(&images.join("nested/c.png"));

        let TransformResult::Written(mut written) = RasterTransform.run(&fixture.context()).unwrap() else {
            panic!("expected written files");
        };
        written.sort();

        let output = &fixture.paths.output_images;
        assert_eq!(written, [output.join("a.png"), output.join("b.jpg")]);
        assert!(!output.join("nested/c.png").exists());

        for name in ["a.png", "b.jpg"] {
            let before = fs::metadata(images.join(name)).unwrap().len();
            let after = fs::metadata(output.join(name)).unwrap().len();
            assert!(after <= before, "{name} grew from {before} to {after}");
            image::open(output.join(name)).unwrap();
        }
    }

    #[test]
    fn test_skips_up_to_date_outputs() {
        let fixture = Fixture::new(Mode::Development);
        let source = fixture.paths.source_images.join("a.png");
        gradient(&source);

        let ctx = fixture.context();
        RasterTransform.run(&ctx).unwrap();
        assert_eq!(
            RasterTransform.run(&ctx).unwrap(),
            TransformResult::Written(vec![])
        );

        fs::File::options()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();

        assert_eq!(
            RasterTransform.run(&ctx).unwrap(),
            TransformResult::Written(vec![fixture.paths.output_images.join("a.png")])
        );
    }

    #[test]
    fn test_broken_image_does_not_stop_others() {
        let fixture = Fixture::new(Mode::Development);
        gradient(&fixture.paths.source_images.join("good.png"));
        fixture.write(&fixture.paths.source_images.join("bad.png"), "not a png");

        let result = RasterTransform.run(&fixture.context()).unwrap();
        assert_eq!(
            result,
            TransformResult::Written(vec![fixture.paths.output_images.join("good.png")])
        );
    }

    #[test]
    fn test_only_broken_images_fail() {
        let fixture = Fixture::new(Mode::Development);
        fixture.write(&fixture.paths.source_images.join("bad.jpg"), "not a jpeg");

        assert!(matches!(
            RasterTransform.run(&fixture.context()).unwrap(),
            TransformResult::Failed(_)
        ));
    }
}
