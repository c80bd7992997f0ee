//! Common types shared between SkyTrack and its collaborators.

use serde::{Deserialize, Serialize};

/// Identifier of one processed frame (a "block").
///
/// Blocks are numbered in processing order, so the difference between two
/// block ids is the number of frames between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Returns the next block.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Number of blocks from `earlier` to `self` (negative if `earlier` is later).
    pub fn blocks_since(self, earlier: BlockId) -> i64 {
        self.0 as i64 - earlier.0 as i64
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Drone camera pose at the moment a frame was captured.
///
/// Produced once per frame by the flight-path oracle and consumed read-only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    /// Easting in metres
    pub easting: f64,

    /// Northing in metres
    pub northing: f64,

    /// Altitude above datum in metres (same datum as the terrain model)
    pub altitude: f64,

    /// Roll in degrees (positive = right wing down)
    pub roll_deg: f64,

    /// Camera pitch in degrees (-90 = looking straight down, 0 = horizon)
    pub pitch_deg: f64,

    /// Compass yaw in degrees (0 = north, clockwise positive)
    pub yaw_deg: f64,
}

impl CameraPose {
    /// Creates a pose looking straight down with the given heading.
    pub fn nadir(easting: f64, northing: f64, altitude: f64, yaw_deg: f64) -> Self {
        Self {
            easting,
            northing,
            altitude,
            roll_deg: 0.0,
            pitch_deg: -90.0,
            yaw_deg,
        }
    }

    /// Returns the camera position as `[easting, northing, altitude]`.
    pub fn position(&self) -> [f64; 3] {
        [self.easting, self.northing, self.altitude]
    }
}

/// Axis-aligned rectangle in image pixel coordinates.
///
/// Origin is the top-left of the image. `left`/`top` are inclusive,
/// `right`/`bottom` exclusive, so a 1×1 box at (3, 4) is `(3, 4, 4, 5)`.
/// Coordinates may be negative or exceed the image after extrapolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PixelBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl PixelBox {
    /// Creates a box from its edges. Inverted edges are normalised.
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: left.max(right),
            bottom: top.max(bottom),
        }
    }

    /// Creates a box of the given size centred on `(cx, cy)`.
    pub fn from_center(cx: f64, cy: f64, width: i32, height: i32) -> Self {
        let left = (cx - width as f64 / 2.0).round() as i32;
        let top = (cy - height as f64 / 2.0).round() as i32;
        Self::new(left, top, left + width, top + height)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Area in pixels.
    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    /// Centre of the box as `(x, y)`.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.left + self.right) as f64 / 2.0,
            (self.top + self.bottom) as f64 / 2.0,
        )
    }

    /// Smallest box containing both `self` and `other`.
    pub fn union(&self, other: &PixelBox) -> PixelBox {
        PixelBox {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    /// Area shared by both boxes (0 if disjoint).
    pub fn intersection_area(&self, other: &PixelBox) -> i64 {
        let w = self.right.min(other.right) - self.left.max(other.left);
        let h = self.bottom.min(other.bottom) - self.top.max(other.top);
        if w <= 0 || h <= 0 {
            0
        } else {
            w as i64 * h as i64
        }
    }

    /// Grows the box by `pixels` on every side.
    pub fn inflate(&self, pixels: i32) -> PixelBox {
        PixelBox::new(
            self.left - pixels,
            self.top - pixels,
            self.right + pixels,
            self.bottom + pixels,
        )
    }

    /// Moves the box by `(dx, dy)` pixels (rounded).
    pub fn translate(&self, dx: f64, dy: f64) -> PixelBox {
        let dx = dx.round() as i32;
        let dy = dy.round() as i32;
        PixelBox {
            left: self.left + dx,
            top: self.top + dy,
            right: self.right + dx,
            bottom: self.bottom + dy,
        }
    }

    /// Returns true if the box touches or crosses the edge of a `width`×`height` image.
    pub fn touches_border(&self, width: u32, height: u32) -> bool {
        self.left <= 0
            || self.top <= 0
            || self.right >= width as i32
            || self.bottom >= height as i32
    }

    /// Returns true if the pixel `(x, y)` lies inside the box.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

/// One hot pixel reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotPixel {
    pub x: i32,
    pub y: i32,

    /// Thermal intensity (0-255)
    pub heat: u8,
}

/// One candidate blob in one frame, as produced by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Bounding box of the blob
    pub pixel_box: PixelBox,

    /// Hot pixels inside the box (empty for detectors without thermal data)
    pub hot_pixels: Vec<HotPixel>,

    /// Detector confidence [0.0 - 1.0], if the detector reports one
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub confidence: Option<f32>,
}

impl RawDetection {
    /// Creates a detection from a box and its hot pixels.
    pub fn new(pixel_box: PixelBox, hot_pixels: Vec<HotPixel>) -> Self {
        Self {
            pixel_box,
            hot_pixels,
            confidence: None,
        }
    }
}
