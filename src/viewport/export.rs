//! Raster export: data-URI decode/encode, cropping and quarter-turn rotation.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageFormat};

use super::geometry::PixelRect;
use crate::error::ViewportError;

pub const MIN_JPEG_QUALITY: u8 = 10;
pub const MAX_JPEG_QUALITY: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    Jpeg { quality: u8 },
}

impl ExportFormat {
    /// JPEG with `quality` clamped to [10, 100].
    pub fn jpeg(quality: u8) -> Self {
        ExportFormat::Jpeg {
            quality: quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
            ExportFormat::Jpeg { .. } => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

/// An encoded image ready to hand back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedImage {
    pub data_uri: String,
    pub width: u32,
    pub height: u32,
}

/// Decode `data:image/...;base64,...`.
pub fn load_data_uri(uri: &str) -> Result<DynamicImage, ViewportError> {
    let rest = uri
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| ViewportError::InvalidSource("not a data URI".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ViewportError::InvalidSource("data URI has no payload".into()))?;
    if !header.ends_with(";base64") {
        return Err(ViewportError::InvalidSource("only base64 data URIs are supported".into()));
    }
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| ViewportError::InvalidSource(format!("invalid base64: {}", e)))?;
    let image = image::load_from_memory(&bytes)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(ViewportError::EmptyImage);
    }
    Ok(image)
}

/// Encode `image` and wrap it as a data URI.
pub fn encode_data_uri(image: &DynamicImage, format: ExportFormat) -> Result<ExportedImage, ViewportError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ViewportError::EmptyImage);
    }

    let mut buf = Vec::new();
    match format {
        ExportFormat::Png => image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| ViewportError::Encode(e.to_string()))?,
        ExportFormat::Jpeg { quality } => {
            // JPEG has no alpha
            let rgb = image.to_rgb8();
            let quality = quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY);
            JpegEncoder::new_with_quality(&mut buf, quality)
                .encode_image(&rgb)
                .map_err(|e| ViewportError::Encode(e.to_string()))?
        }
    }

    Ok(ExportedImage {
        data_uri: format!("data:{};base64,{}", format.mime_type(), STANDARD.encode(&buf)),
        width,
        height,
    })
}

/// Copy `rect` out of `image` at 1:1 source resolution.
pub fn crop(image: &DynamicImage, rect: PixelRect) -> Result<DynamicImage, ViewportError> {
    let (width, height) = image.dimensions();
    let x = rect.x.min(width);
    let y = rect.y.min(height);
    let w = rect.width.min(width - x);
    let h = rect.height.min(height - y);
    if w == 0 || h == 0 {
        return Err(ViewportError::EmptyImage);
    }
    Ok(image.crop_imm(x, y, w, h))
}

/// Quarter turn; width and height swap.
pub fn rotate(image: &DynamicImage, rotation: Rotation) -> DynamicImage {
    match rotation {
        Rotation::Clockwise => image.rotate90(),
        Rotation::CounterClockwise => image.rotate270(),
    }
}

/// Rotate an encoded image and re-encode it as PNG so no quality is lost.
pub fn rotate_data_uri(uri: &str, rotation: Rotation) -> Result<ExportedImage, ViewportError> {
    let image = load_data_uri(uri)?;
    encode_data_uri(&rotate(&image, rotation), ExportFormat::Png)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    /// 3×2 with distinct corners: TL red, TR green, BL blue, BR white.
    fn corners() -> DynamicImage {
        let mut img = RgbaImage::from_pixel(3, 2, Rgba([0, 0, 0, 255]));
        img.put_pixel(0, 0, RED);
        img.put_pixel(2, 0, GREEN);
        img.put_pixel(0, 1, BLUE);
        img.put_pixel(2, 1, WHITE);
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn clockwise_rotation_traces_corners() {
        let r = rotate(&corners(), Rotation::Clockwise).to_rgba8();
        assert_eq!(r.dimensions(), (2, 3));
        // (x, y) -> (H - 1 - y, x)
        assert_eq!(*r.get_pixel(1, 0), RED);
        assert_eq!(*r.get_pixel(1, 2), GREEN);
        assert_eq!(*r.get_pixel(0, 0), BLUE);
        assert_eq!(*r.get_pixel(0, 2), WHITE);
    }

    #[test]
    fn counter_clockwise_rotation_traces_corners() {
        let r = rotate(&corners(), Rotation::CounterClockwise).to_rgba8();
        assert_eq!(r.dimensions(), (2, 3));
        // (x, y) -> (y, W - 1 - x)
        assert_eq!(*r.get_pixel(0, 2), RED);
        assert_eq!(*r.get_pixel(0, 0), GREEN);
        assert_eq!(*r.get_pixel(1, 2), BLUE);
        assert_eq!(*r.get_pixel(1, 0), WHITE);
    }

    #[test]
    fn rotated_data_uri_is_lossless() {
        let uri = encode_data_uri(&corners(), ExportFormat::Png).unwrap().data_uri;
        let rotated = rotate_data_uri(&uri, Rotation::Clockwise).unwrap();
        assert_eq!((rotated.width, rotated.height), (2, 3));
        let back = rotate_data_uri(&rotated.data_uri, Rotation::CounterClockwise).unwrap();
        let decoded = load_data_uri(&back.data_uri).unwrap();
        assert_eq!(decoded.to_rgba8(), corners().to_rgba8());
    }

    #[test]
    fn jpeg_quality_is_clamped() {
        assert_eq!(ExportFormat::jpeg(0), ExportFormat::Jpeg { quality: 10 });
        assert_eq!(ExportFormat::jpeg(255), ExportFormat::Jpeg { quality: 100 });
        let out = encode_data_uri(&corners(), ExportFormat::Jpeg { quality: 3 }).unwrap();
        assert!(out.data_uri.starts_with("data:image/jpeg;base64,"));
        assert_eq!(load_data_uri(&out.data_uri).unwrap().dimensions(), (3, 2));
    }

    #[test]
    fn crop_stays_inside_source() {
        let img = corners();
        let out = crop(&img, PixelRect { x: 2, y: 1, width: 10, height: 10 }).unwrap();
        assert_eq!(out.dimensions(), (1, 1));
        assert_eq!(out.to_rgba8().get_pixel(0, 0), &WHITE);
        assert!(matches!(
            crop(&img, PixelRect { x: 3, y: 0, width: 1, height: 1 }),
            Err(ViewportError::EmptyImage)
        ));
    }

    #[test]
    fn bad_sources_are_rejected() {
        assert!(matches!(load_data_uri("https://example.com/a.png"), Err(ViewportError::InvalidSource(_))));
        assert!(matches!(load_data_uri("data:image/png,raw"), Err(ViewportError::InvalidSource(_))));
        assert!(matches!(load_data_uri("data:image/png;base64,AAAA"), Err(ViewportError::Decode(_))));
    }
}
