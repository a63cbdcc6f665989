//! viewport - zoom, pan, crop and compare state for one displayed image
//!
//! All pointer positions are in container (display) pixels. The crop
//! rectangle lives in displayed-image space and is only mapped to source
//! pixels on commit.

pub mod export;
pub mod filter;
pub mod geometry;

use crate::config::Config;
use crate::error::ViewportError;

pub use export::{ExportFormat, ExportedImage, Rotation};
pub use filter::{Filter, FilterKind};
pub use geometry::{CropRegion, DragTarget, Handle, Point, Size};

/// Share of the image the crop rectangle covers when cropping starts.
const INITIAL_CROP_FRACTION: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Viewing,
    Cropping,
    Comparing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    pub zoom: f64,
    pub pan: Point,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: Point::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportSettings {
    pub min_crop_size: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub zoom_sensitivity: f64,
    pub jpeg_quality: u8,
}

impl ViewportSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_crop_size: config.min_crop_size,
            min_zoom: config.min_zoom,
            max_zoom: config.max_zoom,
            zoom_sensitivity: config.zoom_sensitivity,
            jpeg_quality: config.jpeg_quality,
        }
    }
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            min_crop_size: 40.0,
            min_zoom: 0.1,
            max_zoom: 8.0,
            zoom_sensitivity: 0.001,
            jpeg_quality: 92,
        }
    }
}

/// A crop drag in progress, measured from where it started.
#[derive(Debug, Clone, Copy)]
struct CropDrag {
    target: DragTarget,
    origin: Point,
    start: CropRegion,
}

pub struct ViewportController {
    settings: ViewportSettings,
    displayed: Size,
    mode: ViewMode,
    transform: ViewTransform,
    /// `pointer - pan` captured on pointer-down.
    pan_offset: Option<Point>,
    crop: Option<CropRegion>,
    crop_drag: Option<CropDrag>,
    compare_split: f64,
    filter: Option<Filter>,
}

impl ViewportController {
    /// `displayed` is the rendered size of the image element.
    pub fn new(settings: ViewportSettings, displayed: Size) -> Self {
        Self {
            settings,
            displayed,
            mode: ViewMode::Viewing,
            transform: ViewTransform::default(),
            pan_offset: None,
            crop: None,
            crop_drag: None,
            compare_split: 0.5,
            filter: None,
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn transform(&self) -> ViewTransform {
        self.transform
    }

    pub fn crop_region(&self) -> Option<CropRegion> {
        self.crop
    }

    pub fn displayed_size(&self) -> Size {
        self.displayed
    }

    pub fn compare_split(&self) -> f64 {
        self.compare_split
    }

    pub fn filter(&self) -> Option<Filter> {
        self.filter
    }

    /// The image element was laid out again; the crop keeps its relative place.
    pub fn set_displayed_size(&mut self, displayed: Size) {
        if let Some(crop) = self.crop.as_mut() {
            if !self.displayed.is_empty() && !displayed.is_empty() {
                let sx = displayed.width / self.displayed.width;
                let sy = displayed.height / self.displayed.height;
                let scaled = CropRegion::new(crop.x * sx, crop.y * sy, crop.width * sx, crop.height * sy);
                // re-apply the floor and bounds through a no-op resize
                *crop = scaled
                    .resized(Handle::SE, 0.0, 0.0, displayed, self.settings.min_crop_size)
                    .moved(0.0, 0.0, displayed);
            }
        }
        self.displayed = displayed;
        self.crop_drag = None;
    }

    // ------------------------- zoom / pan -------------------------

    /// Apply a wheel or pinch delta multiplicatively. Returns the new zoom.
    pub fn wheel(&mut self, delta: f64) -> f64 {
        let factor = 1.0 + delta * self.settings.zoom_sensitivity;
        let zoom = if factor.is_finite() && factor > 0.0 {
            self.transform.zoom * factor
        } else {
            self.settings.min_zoom
        };
        self.transform.zoom = zoom.clamp(self.settings.min_zoom, self.settings.max_zoom);
        self.transform.zoom
    }

    pub fn pointer_down(&mut self, pos: Point) {
        if self.mode == ViewMode::Cropping {
            return;
        }
        self.pan_offset = Some(pos - self.transform.pan);
    }

    /// Returns `true` when the pan changed.
    pub fn pointer_move(&mut self, pos: Point) -> bool {
        match self.pan_offset {
            Some(offset) => {
                self.transform.pan = pos - offset;
                true
            }
            None => false,
        }
    }

    pub fn pointer_up(&mut self) {
        self.pan_offset = None;
    }

    pub fn is_panning(&self) -> bool {
        self.pan_offset.is_some()
    }

    pub fn reset_view(&mut self) {
        self.transform = ViewTransform::default();
        self.pan_offset = None;
    }

    /// CSS `transform` for the image element.
    pub fn css_transform(&self) -> String {
        format!(
            "translate({}px, {}px) scale({})",
            self.transform.pan.x, self.transform.pan.y, self.transform.zoom
        )
    }

    // ------------------------- modes -------------------------

    pub fn begin_crop(&mut self) -> Result<(), ViewportError> {
        match self.mode {
            ViewMode::Comparing => Err(ViewportError::ModeBusy("compare")),
            ViewMode::Cropping => Ok(()),
            ViewMode::Viewing => {
                self.mode = ViewMode::Cropping;
                self.pan_offset = None;
                self.crop = Some(CropRegion::centered(self.displayed, INITIAL_CROP_FRACTION).resized(
                    Handle::SE,
                    0.0,
                    0.0,
                    self.displayed,
                    self.settings.min_crop_size,
                ));
                Ok(())
            }
        }
    }

    pub fn cancel_crop(&mut self) {
        if self.mode == ViewMode::Cropping {
            self.mode = ViewMode::Viewing;
        }
        self.crop = None;
        self.crop_drag = None;
    }

    pub fn begin_compare(&mut self) -> Result<(), ViewportError> {
        match self.mode {
            ViewMode::Cropping => Err(ViewportError::ModeBusy("crop")),
            ViewMode::Comparing => Ok(()),
            ViewMode::Viewing => {
                self.mode = ViewMode::Comparing;
                self.compare_split = 0.5;
                Ok(())
            }
        }
    }

    pub fn end_compare(&mut self) {
        if self.mode == ViewMode::Comparing {
            self.mode = ViewMode::Viewing;
        }
    }

    /// Position of the compare divider as a fraction of the width.
    pub fn set_compare_split(&mut self, split: f64) {
        if split.is_finite() {
            self.compare_split = split.clamp(0.0, 1.0);
        }
    }

    pub fn set_filter(&mut self, filter: Option<Filter>) {
        self.filter = filter;
    }

    /// CSS `filter` value matching what export will render.
    pub fn css_filter(&self) -> String {
        self.filter.map_or_else(|| "none".to_string(), |f| f.css())
    }

    // ------------------------- crop drag -------------------------

    pub fn begin_crop_drag(&mut self, target: DragTarget, pos: Point) -> Result<(), ViewportError> {
        let start = match (self.mode, self.crop) {
            (ViewMode::Cropping, Some(crop)) => crop,
            _ => return Err(ViewportError::NotCropping),
        };
        self.crop_drag = Some(CropDrag {
            target,
            origin: pos,
            start,
        });
        Ok(())
    }

    /// Update the crop for the current pointer position. The invariant
    /// holds after every call, not only on release.
    pub fn crop_pointer_move(&mut self, pos: Point) -> Option<CropRegion> {
        let drag = self.crop_drag?;
        let delta = pos - drag.origin;
        let next = match drag.target {
            DragTarget::Handle(handle) => drag.start.resized(
                handle,
                delta.x,
                delta.y,
                self.displayed,
                self.settings.min_crop_size,
            ),
            DragTarget::Body => drag.start.moved(delta.x, delta.y, self.displayed),
        };
        self.crop = Some(next);
        Some(next)
    }

    pub fn crop_pointer_up(&mut self) {
        self.crop_drag = None;
    }

    // ------------------------- export -------------------------

    /// Cut the crop out of `source` (a data URI) at full resolution, with
    /// the active filter applied, and leave crop mode.
    ///
    /// On failure nothing changes, so the caller can retry.
    pub fn commit_crop(&mut self, source: &str, format: ExportFormat) -> Result<ExportedImage, ViewportError> {
        let crop = match (self.mode, self.crop) {
            (ViewMode::Cropping, Some(crop)) => crop,
            _ => return Err(ViewportError::NotCropping),
        };
        let image = export::load_data_uri(source)?;
        let rect = crop.to_natural(self.displayed, image.width(), image.height());
        let mut cropped = export::crop(&image, rect)?;
        if let Some(filter) = self.filter {
            cropped = filter.apply(&cropped);
        }
        let exported = export::encode_data_uri(&cropped, format)?;

        log::info!(
            "Crop committed: {}x{} at ({}, {})",
            rect.width,
            rect.height,
            rect.x,
            rect.y
        );
        self.mode = ViewMode::Viewing;
        self.crop = None;
        self.crop_drag = None;
        Ok(exported)
    }

    /// The whole image with the active filter burned in.
    pub fn export_filtered(&self, source: &str, format: ExportFormat) -> Result<ExportedImage, ViewportError> {
        let image = export::load_data_uri(source)?;
        let image = match self.filter {
            Some(filter) => filter.apply(&image),
            None => image,
        };
        export::encode_data_uri(&image, format)
    }

    /// JPEG at the configured quality.
    pub fn default_jpeg(&self) -> ExportFormat {
        ExportFormat::jpeg(self.settings.jpeg_quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

    fn controller() -> ViewportController {
        ViewportController::new(ViewportSettings::default(), Size::new(1000.0, 800.0))
    }

    fn source(width: u32, height: u32) -> String {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 10, 255])
        }));
        export::encode_data_uri(&img, ExportFormat::Png).unwrap().data_uri
    }

    #[test]
    fn zoom_is_multiplicative_and_clamped() {
        let mut vp = controller();
        assert!((vp.wheel(100.0) - 1.1).abs() < 1e-12);
        assert!((vp.wheel(100.0) - 1.21).abs() < 1e-12);
        for _ in 0..100 {
            vp.wheel(1000.0);
        }
        assert_eq!(vp.transform().zoom, 8.0);
        assert_eq!(vp.wheel(-5000.0), 0.1);
    }

    #[test]
    fn pan_tracks_pointer_exactly() {
        let mut vp = controller();
        vp.pointer_down(Point::new(10.0, 10.0));
        vp.pointer_move(Point::new(60.0, 30.0));
        vp.pointer_up();
        assert_eq!(vp.transform().pan, Point::new(50.0, 20.0));

        // grab again elsewhere; no jump on press
        vp.pointer_down(Point::new(200.0, 200.0));
        vp.pointer_move(Point::new(200.0, 200.0));
        assert_eq!(vp.transform().pan, Point::new(50.0, 20.0));
        vp.pointer_move(Point::new(190.0, 230.0));
        assert_eq!(vp.transform().pan, Point::new(40.0, 50.0));
        vp.pointer_up();
        assert!(!vp.pointer_move(Point::new(0.0, 0.0)));

        vp.reset_view();
        assert_eq!(vp.transform(), ViewTransform::default());
        assert_eq!(vp.css_transform(), "translate(0px, 0px) scale(1)");
    }

    #[test]
    fn crop_and_compare_are_exclusive() {
        let mut vp = controller();
        vp.begin_compare().unwrap();
        assert!(matches!(vp.begin_crop(), Err(ViewportError::ModeBusy(_))));
        assert_eq!(vp.mode(), ViewMode::Comparing);
        vp.end_compare();
        vp.begin_crop().unwrap();
        assert!(matches!(vp.begin_compare(), Err(ViewportError::ModeBusy(_))));
        assert_eq!(vp.mode(), ViewMode::Cropping);
        vp.cancel_crop();
        assert_eq!(vp.mode(), ViewMode::Viewing);
        assert_eq!(vp.crop_region(), None);
    }

    #[test]
    fn se_handle_drag_clamps_to_min_size() {
        let mut vp = controller();
        vp.begin_crop().unwrap();
        let start = vp.crop_region().unwrap();
        let grab = Point::new(start.right(), start.bottom());
        vp.begin_crop_drag(DragTarget::Handle(Handle::SE), grab).unwrap();
        let r = vp.crop_pointer_move(grab + Point::new(-2000.0, -2000.0)).unwrap();
        assert_eq!(r.width, 40.0);
        assert_eq!(r.height, 40.0);
        assert_eq!((r.x, r.y), (start.x, start.y));
        vp.crop_pointer_up();
        assert_eq!(vp.crop_pointer_move(Point::new(0.0, 0.0)), None);
    }

    #[test]
    fn crop_drag_requires_crop_mode() {
        let mut vp = controller();
        assert!(matches!(
            vp.begin_crop_drag(DragTarget::Body, Point::default()),
            Err(ViewportError::NotCropping)
        ));
    }

    #[test]
    fn commit_maps_to_natural_pixels() {
        let mut vp = controller();
        vp.begin_crop().unwrap();
        // crop is (100, 80) 800x640 on a 1000x800 display of a 2000x1600 source
        let out = vp.commit_crop(&source(2000, 1600), ExportFormat::Png).unwrap();
        assert_eq!((out.width, out.height), (1600, 1280));
        let img = export::load_data_uri(&out.data_uri).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [200, 160, 10, 255]);
        assert_eq!(vp.mode(), ViewMode::Viewing);
        assert_eq!(vp.crop_region(), None);
    }

    #[test]
    fn failed_commit_keeps_crop_for_retry() {
        let mut vp = controller();
        vp.begin_crop().unwrap();
        let before = vp.crop_region();
        assert!(vp.commit_crop("not an image", ExportFormat::Png).is_err());
        assert_eq!(vp.mode(), ViewMode::Cropping);
        assert_eq!(vp.crop_region(), before);
    }

    #[test]
    fn filtered_export_applies_filter() {
        let mut vp = controller();
        vp.set_filter(Some(Filter::new(FilterKind::Invert, 100.0)));
        assert_eq!(vp.css_filter(), "invert(100%)");
        let out = vp.export_filtered(&source(4, 4), ExportFormat::Png).unwrap();
        let img = export::load_data_uri(&out.data_uri).unwrap();
        assert_eq!(img.get_pixel(1, 2).0, [254, 253, 245, 255]);
    }

    #[test]
    fn compare_split_is_clamped() {
        let mut vp = controller();
        vp.begin_compare().unwrap();
        vp.set_compare_split(1.7);
        assert_eq!(vp.compare_split(), 1.0);
        vp.set_compare_split(f64::NAN);
        assert_eq!(vp.compare_split(), 1.0);
        vp.set_compare_split(-0.2);
        assert_eq!(vp.compare_split(), 0.0);
    }

    #[test]
    fn relayout_keeps_crop_valid() {
        let mut vp = controller();
        vp.begin_crop().unwrap();
        vp.set_displayed_size(Size::new(500.0, 400.0));
        let crop = vp.crop_region().unwrap();
        assert!(crop.is_within(Size::new(500.0, 400.0), 40.0));
        assert_eq!(crop, CropRegion::new(50.0, 40.0, 400.0, 320.0));
    }
}
