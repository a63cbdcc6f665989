//! Display-space geometry for the crop tool.

use std::ops::{Add, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// One of the eight crop handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handle {
    N,
    S,
    E,
    W,
    NE,
    NW,
    SE,
    SW,
}

impl Handle {
    pub const ALL: [Handle; 8] = [
        Handle::N,
        Handle::S,
        Handle::E,
        Handle::W,
        Handle::NE,
        Handle::NW,
        Handle::SE,
        Handle::SW,
    ];

    fn moves_west(self) -> bool {
        matches!(self, Handle::W | Handle::NW | Handle::SW)
    }

    fn moves_east(self) -> bool {
        matches!(self, Handle::E | Handle::NE | Handle::SE)
    }

    fn moves_north(self) -> bool {
        matches!(self, Handle::N | Handle::NE | Handle::NW)
    }

    fn moves_south(self) -> bool {
        matches!(self, Handle::S | Handle::SE | Handle::SW)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Handle::N => "n",
            Handle::S => "s",
            Handle::E => "e",
            Handle::W => "w",
            Handle::NE => "ne",
            Handle::NW => "nw",
            Handle::SE => "se",
            Handle::SW => "sw",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.as_str() == name)
    }
}

/// What a crop drag grabbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragTarget {
    Handle(Handle),
    /// The interior: moves the whole rectangle.
    Body,
}

/// Crop rectangle in displayed-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CropRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Source-pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// `value.clamp(lo, hi)` that tolerates `lo > hi` by favouring `hi`.
fn clamp_soft(value: f64, lo: f64, hi: f64) -> f64 {
    value.max(lo).min(hi)
}

impl CropRegion {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// A rectangle covering `fraction` of `bounds`, centred.
    pub fn centered(bounds: Size, fraction: f64) -> Self {
        let fraction = fraction.clamp(0.0, 1.0);
        let width = bounds.width * fraction;
        let height = bounds.height * fraction;
        Self {
            x: (bounds.width - width) / 2.0,
            y: (bounds.height - height) / 2.0,
            width,
            height,
        }
    }

    /// Resize by dragging `handle` by `(dx, dy)` from this rectangle.
    ///
    /// `self` is the rectangle at drag start and the delta is the total
    /// pointer travel, so repeated moves never accumulate error. Only the
    /// dragged edges move; the opposite edge stays exactly where it was.
    pub fn resized(&self, handle: Handle, dx: f64, dy: f64, bounds: Size, min_size: f64) -> Self {
        let min_w = min_size.min(bounds.width);
        let min_h = min_size.min(bounds.height);
        let mut next = *self;

        if handle.moves_west() {
            let right = self.right();
            next.x = clamp_soft(self.x + dx, 0.0, right - min_w);
            next.width = right - next.x;
        } else if handle.moves_east() {
            let right = clamp_soft(self.right() + dx, self.x + min_w, bounds.width);
            next.width = right - self.x;
        }

        if handle.moves_north() {
            let bottom = self.bottom();
            next.y = clamp_soft(self.y + dy, 0.0, bottom - min_h);
            next.height = bottom - next.y;
        } else if handle.moves_south() {
            let bottom = clamp_soft(self.bottom() + dy, self.y + min_h, bounds.height);
            next.height = bottom - self.y;
        }

        next
    }

    /// Translate without resizing, kept inside `bounds`.
    pub fn moved(&self, dx: f64, dy: f64, bounds: Size) -> Self {
        Self {
            x: clamp_soft(self.x + dx, 0.0, bounds.width - self.width),
            y: clamp_soft(self.y + dy, 0.0, bounds.height - self.height),
            ..*self
        }
    }

    /// Whether the rectangle respects the bounds and the size floor.
    pub fn is_within(&self, bounds: Size, min_size: f64) -> bool {
        const EPS: f64 = 1e-9;
        self.x >= -EPS
            && self.y >= -EPS
            && self.right() <= bounds.width + EPS
            && self.bottom() <= bounds.height + EPS
            && self.width + EPS >= min_size.min(bounds.width)
            && self.height + EPS >= min_size.min(bounds.height)
    }

    /// Map to source pixels using `natural / displayed` per axis.
    /// The result is at least 1×1 and never leaves the source image.
    pub fn to_natural(&self, displayed: Size, natural_width: u32, natural_height: u32) -> PixelRect {
        let sx = if displayed.width > 0.0 { natural_width as f64 / displayed.width } else { 1.0 };
        let sy = if displayed.height > 0.0 { natural_height as f64 / displayed.height } else { 1.0 };

        let x = ((self.x * sx).round().max(0.0) as u32).min(natural_width.saturating_sub(1));
        let y = ((self.y * sy).round().max(0.0) as u32).min(natural_height.saturating_sub(1));
        let width = ((self.width * sx).round().max(1.0) as u32).min(natural_width - x);
        let height = ((self.height * sy).round().max(1.0) as u32).min(natural_height - y);
        PixelRect { x, y, width, height }
    }
}
