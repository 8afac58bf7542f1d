//! Coordinate transforms between the three spaces an overlay lives in.
//!
//! - **Normalized space:** `[0.0, 1.0]` on both axes, `(0, 0)` is the
//!   top-left corner of the frame. This is the single source of truth
//!   stored on every overlay.
//! - **Clip space:** `[-1.0, 1.0]` centered on the frame with the vertical
//!   axis pointing up. Used by preview renderers.
//! - **Pixel space:** absolute pixels of the base video. Used by the
//!   filter-graph generator.
//!
//! Every function here is total over finite inputs. Callers are expected
//! to reject NaN and infinities before they get this far.

use serde::{Deserialize, Serialize};

/// A normalized point (overlay anchor = its center).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    /// Frame center.
    pub const CENTER: NormalizedPoint = NormalizedPoint { x: 0.5, y: 0.5 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Default for NormalizedPoint {
    fn default() -> Self {
        Self::CENTER
    }
}

/// Half of an overlay's width/height as a fraction of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HalfExtent {
    pub w: f64,
    pub h: f64,
}

impl HalfExtent {
    pub fn new(w: f64, h: f64) -> Self {
        Self { w, h }
    }

    /// Half extent of a pixel-sized overlay inside the given frame.
    pub fn from_pixels(extent: PixelExtent, frame: FrameSize) -> Self {
        Self {
            w: extent.width / (2.0 * frame.width.max(1) as f64),
            h: extent.height / (2.0 * frame.height.max(1) as f64),
        }
    }
}

/// Size of the base video frame in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether both dimensions are non-zero.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn aspect(&self) -> f64 {
        self.width.max(1) as f64 / self.height.max(1) as f64
    }
}

/// An extent in absolute pixels. Fractional values are allowed while
/// editing; the filter graph rounds them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelExtent {
    pub width: f64,
    pub height: f64,
}

impl PixelExtent {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Multiply both axes by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    /// Whole-pixel dimensions, never below 1x1.
    pub fn rounded(&self) -> (u32, u32) {
        (
            self.width.round().max(1.0) as u32,
            self.height.round().max(1.0) as u32,
        )
    }
}

/// A point in renderer clip space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipPoint {
    pub x: f64,
    pub y: f64,
}

/// An axis-aligned rectangle in clip space, stored as center + half size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipRect {
    pub center: ClipPoint,
    pub half_w: f64,
    pub half_h: f64,
}

impl ClipRect {
    pub fn contains(&self, p: ClipPoint) -> bool {
        (p.x - self.center.x).abs() <= self.half_w && (p.y - self.center.y).abs() <= self.half_h
    }
}

/// Map a normalized center and half extent into clip space.
///
/// `x_clip = 2x - 1`, `y_clip = -(2y - 1)`. Clip space spans two units per
/// axis, so the half extent doubles.
pub fn to_clip_space(p: NormalizedPoint, half: HalfExtent) -> ClipRect {
    ClipRect {
        center: ClipPoint {
            x: p.x * 2.0 - 1.0,
            y: -(p.y * 2.0 - 1.0),
        },
        half_w: half.w * 2.0,
        half_h: half.h * 2.0,
    }
}

/// Inverse of [`to_clip_space`] for a single point.
pub fn from_clip_space(c: ClipPoint) -> NormalizedPoint {
    NormalizedPoint {
        x: (c.x + 1.0) / 2.0,
        y: (-c.y + 1.0) / 2.0,
    }
}

/// Clamp a center so the whole extent stays inside `[0, 1]`.
///
/// When the overlay is wider (or taller) than the frame the valid range
/// would be empty; that axis is pinned to the midpoint `0.5`.
pub fn clamp_to_frame(p: NormalizedPoint, half: HalfExtent) -> NormalizedPoint {
    NormalizedPoint {
        x: clamp_axis(p.x, half.w),
        y: clamp_axis(p.y, half.h),
    }
}

fn clamp_axis(v: f64, half: f64) -> f64 {
    let half = half.max(0.0);
    if half >= 0.5 {
        return 0.5;
    }
    v.clamp(half, 1.0 - half)
}

/// Normalized center to absolute pixel center.
pub fn to_pixel_space(p: NormalizedPoint, frame: FrameSize) -> (f64, f64) {
    (p.x * frame.width as f64, p.y * frame.height as f64)
}

/// Top-left pixel offset of an extent centered at `center`.
pub fn top_left_offset(center: (f64, f64), extent: (u32, u32)) -> (i64, i64) {
    (
        (center.0 - extent.0 as f64 / 2.0).round() as i64,
        (center.1 - extent.1 as f64 / 2.0).round() as i64,
    )
}

/// Convert a pointer position on a preview canvas into normalized space.
/// Positions outside the canvas are clamped to its edges.
pub fn normalized_from_canvas(px: f64, py: f64, canvas_w: f64, canvas_h: f64) -> NormalizedPoint {
    if canvas_w <= 0.0 || canvas_h <= 0.0 {
        return NormalizedPoint::CENTER;
    }
    NormalizedPoint {
        x: (px / canvas_w).clamp(0.0, 1.0),
        y: (py / canvas_h).clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_clip_space_inverts_vertical_axis() {
        let rect = to_clip_space(NormalizedPoint::new(0.0, 0.0), HalfExtent::default());
        assert_eq!(rect.center, ClipPoint { x: -1.0, y: 1.0 });

        let rect = to_clip_space(NormalizedPoint::new(1.0, 1.0), HalfExtent::new(0.1, 0.2));
        assert_eq!(rect.center, ClipPoint { x: 1.0, y: -1.0 });
        assert!((rect.half_w - 0.2).abs() < 1e-12);
        assert!((rect.half_h - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_clip_round_trip_center() {
        let p = NormalizedPoint::new(0.3, 0.8);
        let back = from_clip_space(to_clip_space(p, HalfExtent::default()).center);
        assert!((back.x - 0.3).abs() < 1e-12);
        assert!((back.y - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_clamp_keeps_extent_inside_frame() {
        let clamped = clamp_to_frame(NormalizedPoint::new(0.0, 1.0), HalfExtent::new(0.1, 0.25));
        assert!((clamped.x - 0.1).abs() < 1e-12);
        assert!((clamped.y - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_clamp_degenerate_axis_pins_to_midpoint() {
        let clamped = clamp_to_frame(NormalizedPoint::new(0.9, 0.2), HalfExtent::new(0.7, 0.1));
        assert_eq!(clamped.x, 0.5);
        assert!((clamped.y - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_pixel_space_and_top_left() {
        let frame = FrameSize::new(1920, 1080);
        let center = to_pixel_space(NormalizedPoint::CENTER, frame);
        assert_eq!(center, (960.0, 540.0));
        assert_eq!(top_left_offset(center, (200, 200)), (860, 440));
    }

    #[test]
    fn test_half_extent_from_pixels() {
        let half = HalfExtent::from_pixels(PixelExtent::new(192.0, 108.0), FrameSize::new(1920, 1080));
        assert!((half.w - 0.05).abs() < 1e-12);
        assert!((half.h - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_pixel_extent_rounding_never_zero() {
        assert_eq!(PixelExtent::new(0.2, 199.6).rounded(), (1, 200));
    }

    #[test]
    fn test_normalized_from_canvas_clamps() {
        let p = normalized_from_canvas(-20.0, 150.0, 400.0, 300.0);
        assert_eq!(p, NormalizedPoint::new(0.0, 0.5));
        assert_eq!(normalized_from_canvas(1.0, 1.0, 0.0, 0.0), NormalizedPoint::CENTER);
    }

    proptest! {
        #[test]
        fn clamp_is_idempotent(
            x in -2.0f64..3.0,
            y in -2.0f64..3.0,
            hw in 0.0f64..=0.5,
            hh in 0.0f64..=0.5,
        ) {
            let half = HalfExtent::new(hw, hh);
            let once = clamp_to_frame(NormalizedPoint::new(x, y), half);
            let twice = clamp_to_frame(once, half);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn clamped_extent_stays_in_frame(
            x in 0.0f64..=1.0,
            y in 0.0f64..=1.0,
            hw in 0.0f64..=0.5,
            hh in 0.0f64..=0.5,
        ) {
            let p = clamp_to_frame(NormalizedPoint::new(x, y), HalfExtent::new(hw, hh));
            prop_assert!(p.x - hw >= -1e-12 && p.x + hw <= 1.0 + 1e-12);
            prop_assert!(p.y - hh >= -1e-12 && p.y + hh <= 1.0 + 1e-12);
        }
    }
}
