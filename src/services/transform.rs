use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::models::task::Style;

/// Image processing step run by the worker between fetch and publish.
///
/// Implementations read the staged input file and write the complete output
/// file. Output must be a pure function of the input; on error the caller
/// discards whatever was written.
pub trait Transform: Send + Sync {
    fn apply(&self, input: &Path, output: &Path) -> Result<(), TransformError>;
}

/// Pick the transform for a requested style.
pub fn for_style(style: Style) -> Box<dyn Transform> {
    match style {
        Style::Original => Box::new(CopyTransform),
        Style::Monochrome => Box::new(MonochromeTransform),
        Style::Mirror => Box::new(MirrorTransform),
    }
}

/// Byte-identical copy.
pub struct CopyTransform;

impl Transform for CopyTransform {
    fn apply(&self, input: &Path, output: &Path) -> Result<(), TransformError> {
        let mut reader = BufReader::new(File::open(input)?);
        let mut writer = BufWriter::new(File::create(output)?);
        std::io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

/// Grayscale re-encode as JPEG.
pub struct MonochromeTransform;

impl Transform for MonochromeTransform {
    fn apply(&self, input: &Path, output: &Path) -> Result<(), TransformError> {
        let image = decode(input)?;
        encode_jpeg(&DynamicImage::ImageLuma8(image.to_luma8()), output)
    }
}

/// Horizontal flip re-encoded as JPEG.
pub struct MirrorTransform;

impl Transform for MirrorTransform {
    fn apply(&self, input: &Path, output: &Path) -> Result<(), TransformError> {
        let image = decode(input)?.fliph();
        encode_jpeg(&DynamicImage::ImageRgb8(image.to_rgb8()), output)
    }
}

fn decode(input: &Path) -> Result<DynamicImage, TransformError> {
    Ok(ImageReader::open(input)?.with_guessed_format()?.decode()?)
}

fn encode_jpeg(image: &DynamicImage, output: &Path) -> Result<(), TransformError> {
    let mut writer = BufWriter::new(File::create(output)?);
    image.write_to(&mut writer, ImageFormat::Jpeg)?;
    writer.flush()?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Transform I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image could not be processed: {0}")]
    Image(#[from] image::ImageError),
}
