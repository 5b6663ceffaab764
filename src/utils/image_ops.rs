use image::{imageops, DynamicImage, ImageDecoder, ImageError, ImageFormat, ImageReader, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;

use crate::core::errors::{PipelineError, PipelineResult};
use crate::core::types::Bubble;

/// Decode any supported format into RGBA, applying EXIF orientation so that
/// every later stage sees the image upright.
pub fn decode_image(bytes: &[u8]) -> PipelineResult<RgbaImage> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PipelineError::Decode(ImageError::IoError(e)))?;
    let mut decoder = reader.into_decoder().map_err(PipelineError::Decode)?;
    let orientation = decoder.orientation().map_err(PipelineError::Decode)?;
    let mut img = DynamicImage::from_decoder(decoder).map_err(PipelineError::Decode)?;
    img.apply_orientation(orientation);

    let rgba = img.into_rgba8();
    if rgba.width() == 0 || rgba.height() == 0 {
        return Err(PipelineError::EmptyImage {
            width: rgba.width(),
            height: rgba.height(),
        });
    }
    Ok(rgba)
}

/// Decode on the blocking pool; decoding large screenshots is CPU-bound
pub async fn decode_image_async(bytes: Arc<[u8]>) -> PipelineResult<RgbaImage> {
    tokio::task::spawn_blocking(move || decode_image(&bytes))
        .await
        .map_err(|e| PipelineError::join("decode", e))?
}

pub fn encode_png(img: &RgbaImage) -> PipelineResult<Vec<u8>> {
    let mut png_bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .map_err(PipelineError::Encode)?;
    Ok(png_bytes)
}

pub async fn encode_png_async(img: RgbaImage) -> PipelineResult<Vec<u8>> {
    tokio::task::spawn_blocking(move || encode_png(&img))
        .await
        .map_err(|e| PipelineError::join("encode", e))?
}

/// Copy out the exact bubble rectangle (clipped to the image)
pub fn crop_bubble(img: &RgbaImage, bubble: &Bubble) -> RgbaImage {
    let w = bubble.w.min(img.width().saturating_sub(bubble.x));
    let h = bubble.h.min(img.height().saturating_sub(bubble.y));
    imageops::crop_imm(img, bubble.x, bubble.y, w, h).to_image()
}
