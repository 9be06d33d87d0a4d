use std::io::Cursor;

use base64::{prelude::BASE64_STANDARD, Engine};
use image::DynamicImage;

/// Encodes a finished raster image as a base64 PNG payload, the
/// transport-safe form carried by `success` events.
pub fn image_to_base64_png(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(BASE64_STANDARD.encode(&bytes))
}
