//! Cosmetic filters, rendered both as CSS text for display and as pixel
//! operations for export so both look the same.

use image::{DynamicImage, Rgba, RgbaImage, imageops};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Grayscale,
    Sepia,
    Invert,
    Brightness,
    Contrast,
    Saturate,
    Blur,
}

impl FilterKind {
    pub const ALL: [FilterKind; 7] = [
        FilterKind::Grayscale,
        FilterKind::Sepia,
        FilterKind::Invert,
        FilterKind::Brightness,
        FilterKind::Contrast,
        FilterKind::Saturate,
        FilterKind::Blur,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FilterKind::Grayscale => "grayscale",
            FilterKind::Sepia => "sepia",
            FilterKind::Invert => "invert",
            FilterKind::Brightness => "brightness",
            FilterKind::Contrast => "contrast",
            FilterKind::Saturate => "saturate",
            FilterKind::Blur => "blur",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            FilterKind::Blur => "px",
            _ => "%",
        }
    }

    /// Intensity at which the filter leaves pixels untouched.
    pub fn neutral(self) -> f64 {
        match self {
            FilterKind::Brightness | FilterKind::Contrast | FilterKind::Saturate => 100.0,
            _ => 0.0,
        }
    }

    /// Upper bound of the intensity, if any.
    fn max_intensity(self) -> Option<f64> {
        match self {
            FilterKind::Grayscale | FilterKind::Sepia | FilterKind::Invert => Some(100.0),
            _ => None,
        }
    }
}

/// A named effect with an intensity in its unit (`%` or `px`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Filter {
    pub kind: FilterKind,
    pub intensity: f64,
}

impl Filter {
    pub fn new(kind: FilterKind, intensity: f64) -> Self {
        let intensity = if intensity.is_finite() { intensity.max(0.0) } else { kind.neutral() };
        let intensity = kind.max_intensity().map_or(intensity, |max| intensity.min(max));
        Self { kind, intensity }
    }

    pub fn unit(&self) -> &'static str {
        self.kind.unit()
    }

    /// `grayscale(100%)`, `blur(4px)`, ...
    pub fn css(&self) -> String {
        format!("{}({}{})", self.kind.name(), self.intensity, self.unit())
    }

    /// Render the filter into pixels.
    pub fn apply(&self, image: &DynamicImage) -> DynamicImage {
        let amount = self.intensity / 100.0;
        let mut rgba = image.to_rgba8();
        match self.kind {
            FilterKind::Blur => {
                if self.intensity > 0.0 {
                    rgba = imageops::blur(&rgba, self.intensity as f32);
                }
            }
            FilterKind::Grayscale => apply_matrix(&mut rgba, &grayscale_matrix(amount)),
            FilterKind::Sepia => apply_matrix(&mut rgba, &sepia_matrix(amount)),
            FilterKind::Saturate => apply_matrix(&mut rgba, &saturate_matrix(amount)),
            FilterKind::Invert => map_channels(&mut rgba, |c| amount * (1.0 - c) + (1.0 - amount) * c),
            FilterKind::Brightness => map_channels(&mut rgba, |c| c * amount),
            FilterKind::Contrast => map_channels(&mut rgba, |c| (c - 0.5) * amount + 0.5),
        }
        DynamicImage::ImageRgba8(rgba)
    }
}

/// The filter list offered in the editor, each at its default strength.
pub fn presets() -> Vec<Filter> {
    vec![
        Filter::new(FilterKind::Grayscale, 100.0),
        Filter::new(FilterKind::Sepia, 100.0),
        Filter::new(FilterKind::Invert, 100.0),
        Filter::new(FilterKind::Brightness, 150.0),
        Filter::new(FilterKind::Contrast, 150.0),
        Filter::new(FilterKind::Saturate, 200.0),
        Filter::new(FilterKind::Blur, 4.0),
    ]
}

type Matrix = [[f64; 3]; 3];

// Matrices follow the CSS Filter Effects definitions.
fn grayscale_matrix(amount: f64) -> Matrix {
    let a = 1.0 - amount.clamp(0.0, 1.0);
    [
        [0.2126 + 0.7874 * a, 0.7152 - 0.7152 * a, 0.0722 - 0.0722 * a],
        [0.2126 - 0.2126 * a, 0.7152 + 0.2848 * a, 0.0722 - 0.0722 * a],
        [0.2126 - 0.2126 * a, 0.7152 - 0.7152 * a, 0.0722 + 0.9278 * a],
    ]
}

fn sepia_matrix(amount: f64) -> Matrix {
    let a = 1.0 - amount.clamp(0.0, 1.0);
    [
        [0.393 + 0.607 * a, 0.769 - 0.769 * a, 0.189 - 0.189 * a],
        [0.349 - 0.349 * a, 0.686 + 0.314 * a, 0.168 - 0.168 * a],
        [0.272 - 0.272 * a, 0.534 - 0.534 * a, 0.131 + 0.869 * a],
    ]
}

fn saturate_matrix(s: f64) -> Matrix {
    [
        [0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s],
    ]
}

fn to_u8(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn apply_matrix(image: &mut RgbaImage, m: &Matrix) {
    for Rgba([r, g, b, _]) in image.pixels_mut() {
        let rgb = [*r as f64 / 255.0, *g as f64 / 255.0, *b as f64 / 255.0];
        let out: [f64; 3] = std::array::from_fn(|row| {
            m[row][0] * rgb[0] + m[row][1] * rgb[1] + m[row][2] * rgb[2]
        });
        (*r, *g, *b) = (to_u8(out[0]), to_u8(out[1]), to_u8(out[2]));
    }
}

/// Same function on R, G and B; alpha untouched.
fn map_channels(image: &mut RgbaImage, f: impl Fn(f64) -> f64) {
    for pixel in image.pixels_mut() {
        for c in pixel.0.iter_mut().take(3) {
            *c = to_u8(f(*c as f64 / 255.0));
        }
    }
}
