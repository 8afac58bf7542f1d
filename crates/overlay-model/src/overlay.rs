//! The canonical overlay type.
//!
//! An overlay is a time-bounded image or text layer. Both variants share
//! identity, timing and placement; the payload differs per kind and is
//! matched exhaustively wherever behavior diverges.

use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use layercut_common::error::LayercutError;

use crate::transform::{clamp_to_frame, FrameSize, HalfExtent, NormalizedPoint, PixelExtent};

/// Allowed range for the image size multiplier.
pub const SIZE_SCALE_RANGE: RangeInclusive<f64> = 0.1..=5.0;

/// Allowed range for text font size (pixels).
pub const FONT_SIZE_RANGE: RangeInclusive<f64> = 12.0..=100.0;

/// Visible duration given to newly added overlays.
pub const DEFAULT_OVERLAY_SECS: f64 = 2.0;

/// Pixel size given to newly inserted images.
pub const DEFAULT_IMAGE_EXTENT: f64 = 100.0;

pub const DEFAULT_FONT_SIZE: f64 = 24.0;

/// Text is rasterized onto a canvas of this size at [`TEXT_BASE_FONT_SIZE`]
/// and then scaled by `font_size / TEXT_BASE_FONT_SIZE`.
pub const TEXT_RASTER_BASE: (f64, f64) = (512.0, 128.0);
pub const TEXT_BASE_FONT_SIZE: f64 = 32.0;

/// Opaque, immutable overlay identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverlayId(u64);

impl OverlayId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "overlay-{}", self.0)
    }
}

/// Visibility window on the base video's timeline (seconds, inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeWindow", into = "RawTimeWindow")]
pub struct TimeWindow {
    start: f64,
    end: f64,
}

#[derive(Serialize, Deserialize)]
struct RawTimeWindow {
    start: f64,
    end: f64,
}

impl TryFrom<RawTimeWindow> for TimeWindow {
    type Error = ValidationError;

    fn try_from(raw: RawTimeWindow) -> Result<Self, Self::Error> {
        TimeWindow::new(raw.start, raw.end)
    }
}

impl From<TimeWindow> for RawTimeWindow {
    fn from(w: TimeWindow) -> Self {
        RawTimeWindow {
            start: w.start,
            end: w.end,
        }
    }
}

impl TimeWindow {
    /// Create a window, enforcing `0 <= start < end`.
    pub fn new(start: f64, end: f64) -> Result<Self, ValidationError> {
        if !start.is_finite() || !end.is_finite() || start < 0.0 || start >= end {
            return Err(ValidationError::InvalidTimeWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// The default window for an overlay added while the preview playhead
    /// sits at `preview_time`.
    pub fn starting_at(preview_time: f64) -> Self {
        let start = if preview_time.is_finite() {
            preview_time.max(0.0)
        } else {
            0.0
        };
        Self {
            start,
            end: start + DEFAULT_OVERLAY_SECS,
        }
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Inclusive on both ends.
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.end
    }
}

/// Reference to overlay or base media. Resolution is the fetcher's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MediaRef {
    Path(PathBuf),
    Url(String),
}

impl MediaRef {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// Lower-case file extension, if the reference carries one.
    pub fn extension(&self) -> Option<String> {
        let name = match self {
            MediaRef::Path(p) => p.file_name()?.to_string_lossy().into_owned(),
            MediaRef::Url(u) => {
                let without_query = u.split(['?', '#']).next().unwrap_or(u);
                without_query.rsplit('/').next()?.to_string()
            }
        };
        Path::new(&name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.len() <= 5)
    }
}

impl From<String> for MediaRef {
    fn from(raw: String) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            MediaRef::Url(raw)
        } else {
            MediaRef::Path(PathBuf::from(raw))
        }
    }
}

impl From<MediaRef> for String {
    fn from(media: MediaRef) -> Self {
        media.to_string()
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaRef::Path(p) => write!(f, "{}", p.display()),
            MediaRef::Url(u) => f.write_str(u),
        }
    }
}

/// An opaque RGB text color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color {
        r: 0xff,
        g: 0xff,
        b: 0xff,
    };

    /// `0xRRGGBB`, the form ffmpeg's color options accept.
    pub fn to_ffmpeg(&self) -> String {
        format!("0x{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = ValidationError;

    /// Accepts `#rgb` and `#rrggbb` (the leading `#` is optional).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidColor {
            value: s.to_string(),
        };
        let hex = s.trim().trim_start_matches('#');
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |digits: &str| u8::from_str_radix(digits, 16).map_err(|_| invalid());
        match hex.len() {
            3 => {
                let expand = |i: usize| channel(hex[i..i + 1].repeat(2).as_str());
                Ok(Color {
                    r: expand(0)?,
                    g: expand(1)?,
                    b: expand(2)?,
                })
            }
            6 => Ok(Color {
                r: channel(&hex[0..2])?,
                g: channel(&hex[2..4])?,
                b: channel(&hex[4..6])?,
            }),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Color {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Image-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub source: MediaRef,
    /// Base pixel width, `>= 1`.
    pub width: f64,
    /// Base pixel height, `>= 1`.
    pub height: f64,
    /// Multiplier applied to the base extent, clamped to [`SIZE_SCALE_RANGE`].
    pub size_scale: f64,
}

/// Text-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPayload {
    pub text: String,
    /// Clamped to [`FONT_SIZE_RANGE`].
    pub font_size: f64,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OverlayKind {
    Image(ImagePayload),
    Text(TextPayload),
}

impl OverlayKind {
    pub fn name(&self) -> &'static str {
        match self {
            OverlayKind::Image(_) => "image",
            OverlayKind::Text(_) => "text",
        }
    }
}

/// A stored overlay. Only the [`crate::store::OverlayStore`] creates these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub(crate) id: OverlayId,
    pub(crate) time_window: TimeWindow,
    pub(crate) position: NormalizedPoint,
    pub(crate) kind: OverlayKind,
}

impl Overlay {
    pub fn id(&self) -> OverlayId {
        self.id
    }

    pub fn time_window(&self) -> TimeWindow {
        self.time_window
    }

    /// Normalized center.
    pub fn position(&self) -> NormalizedPoint {
        self.position
    }

    pub fn kind(&self) -> &OverlayKind {
        &self.kind
    }

    pub fn is_visible_at(&self, t: f64) -> bool {
        self.time_window.contains(t)
    }

    /// Rendered size in pixels.
    pub fn pixel_extent(&self) -> PixelExtent {
        kind_extent(&self.kind)
    }

    /// Half extent in normalized units for the given frame.
    pub fn half_extent(&self, frame: FrameSize) -> HalfExtent {
        HalfExtent::from_pixels(self.pixel_extent(), frame)
    }

    /// Check every invariant. The store never lets an invalid overlay in;
    /// consumers that receive overlays from elsewhere call this.
    pub fn validate(&self) -> Result<(), ValidationError> {
        TimeWindow::new(self.time_window.start, self.time_window.end)?;
        if !self.position.is_finite() {
            return Err(ValidationError::NonFinite { field: "position" });
        }
        validate_kind(&self.kind)
    }

    /// Build the next version of this overlay with `patch` applied, clamps
    /// included. `self` is left untouched.
    pub(crate) fn patched(
        &self,
        patch: &OverlayPatch,
        frame: FrameSize,
    ) -> Result<Overlay, ValidationError> {
        let mut next = self.clone();

        if patch.start_time.is_some() || patch.end_time.is_some() {
            next.time_window = TimeWindow::new(
                patch.start_time.unwrap_or(self.time_window.start),
                patch.end_time.unwrap_or(self.time_window.end),
            )?;
        }
        if let Some(position) = patch.position {
            next.position = position;
        }

        match &mut next.kind {
            OverlayKind::Image(image) => {
                reject_field(patch.text.is_some(), "text", "image")?;
                reject_field(patch.font_size.is_some(), "font_size", "image")?;
                reject_field(patch.color.is_some(), "color", "image")?;
                if let Some(extent) = patch.extent {
                    image.width = extent.width;
                    image.height = extent.height;
                }
                if let Some(scale) = patch.size_scale {
                    image.size_scale = scale;
                }
                if let Some(drawn) = patch.drawn_extent {
                    let scale = image
                        .size_scale
                        .clamp(*SIZE_SCALE_RANGE.start(), *SIZE_SCALE_RANGE.end());
                    image.width = drawn.width / scale;
                    image.height = drawn.height / scale;
                }
            }
            OverlayKind::Text(text) => {
                reject_field(patch.extent.is_some(), "extent", "text")?;
                reject_field(patch.drawn_extent.is_some(), "extent", "text")?;
                reject_field(patch.size_scale.is_some(), "size_scale", "text")?;
                if let Some(value) = &patch.text {
                    text.text = value.clone();
                }
                if let Some(size) = patch.font_size {
                    text.font_size = size;
                }
                if let Some(color) = patch.color {
                    text.color = color;
                }
            }
        }

        next.normalize(frame)?;
        Ok(next)
    }

    /// Validate, then clamp scale/font size and keep the extent inside the
    /// frame.
    pub(crate) fn normalize(&mut self, frame: FrameSize) -> Result<(), ValidationError> {
        if !self.position.is_finite() {
            return Err(ValidationError::NonFinite { field: "position" });
        }
        validate_kind(&self.kind)?;
        match &mut self.kind {
            OverlayKind::Image(image) => {
                image.size_scale = image
                    .size_scale
                    .clamp(*SIZE_SCALE_RANGE.start(), *SIZE_SCALE_RANGE.end());
            }
            OverlayKind::Text(text) => {
                text.font_size = text
                    .font_size
                    .clamp(*FONT_SIZE_RANGE.start(), *FONT_SIZE_RANGE.end());
            }
        }
        self.reclamp(frame);
        Ok(())
    }

    /// Keep the extent inside `frame`. Cannot fail on an overlay that has
    /// already been normalized.
    pub(crate) fn reclamp(&mut self, frame: FrameSize) {
        self.position = clamp_to_frame(self.position, self.half_extent(frame));
    }
}

fn kind_extent(kind: &OverlayKind) -> PixelExtent {
    match kind {
        OverlayKind::Image(image) => {
            PixelExtent::new(image.width, image.height).scaled(image.size_scale)
        }
        OverlayKind::Text(text) => PixelExtent::new(TEXT_RASTER_BASE.0, TEXT_RASTER_BASE.1)
            .scaled(text.font_size / TEXT_BASE_FONT_SIZE),
    }
}

fn validate_kind(kind: &OverlayKind) -> Result<(), ValidationError> {
    match kind {
        OverlayKind::Image(image) => {
            if !image.width.is_finite() || !image.height.is_finite() {
                return Err(ValidationError::NonFinite { field: "extent" });
            }
            if image.width < 1.0 || image.height < 1.0 {
                return Err(ValidationError::NonPositiveExtent {
                    width: image.width,
                    height: image.height,
                });
            }
            if !image.size_scale.is_finite() {
                return Err(ValidationError::NonFinite {
                    field: "size_scale",
                });
            }
        }
        OverlayKind::Text(text) => {
            if !text.font_size.is_finite() {
                return Err(ValidationError::NonFinite { field: "font_size" });
            }
        }
    }
    Ok(())
}

fn reject_field(present: bool, field: &'static str, kind: &'static str) -> Result<(), ValidationError> {
    if present {
        Err(ValidationError::FieldMismatch { field, kind })
    } else {
        Ok(())
    }
}

/// A not-yet-stored overlay. The store assigns the id on `add`.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayDraft {
    pub kind: OverlayKind,
    pub position: NormalizedPoint,
    pub time_window: TimeWindow,
}

impl OverlayDraft {
    /// A centered image shown for the default duration starting at 0.
    pub fn image(source: MediaRef) -> Self {
        Self {
            kind: OverlayKind::Image(ImagePayload {
                source,
                width: DEFAULT_IMAGE_EXTENT,
                height: DEFAULT_IMAGE_EXTENT,
                size_scale: 1.0,
            }),
            position: NormalizedPoint::CENTER,
            time_window: TimeWindow::starting_at(0.0),
        }
    }

    /// A centered white text layer.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: OverlayKind::Text(TextPayload {
                text: text.into(),
                font_size: DEFAULT_FONT_SIZE,
                color: Color::WHITE,
            }),
            position: NormalizedPoint::CENTER,
            time_window: TimeWindow::starting_at(0.0),
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = NormalizedPoint::new(x, y);
        self
    }

    pub fn during(mut self, window: TimeWindow) -> Self {
        self.time_window = window;
        self
    }

    /// Use the default window anchored at the preview playhead.
    pub fn starting_at(mut self, preview_time: f64) -> Self {
        self.time_window = TimeWindow::starting_at(preview_time);
        self
    }

    /// Image only; ignored for text.
    pub fn with_extent(mut self, width: f64, height: f64) -> Self {
        if let OverlayKind::Image(image) = &mut self.kind {
            image.width = width;
            image.height = height;
        }
        self
    }

    /// Image only; ignored for text.
    pub fn with_size_scale(mut self, scale: f64) -> Self {
        if let OverlayKind::Image(image) = &mut self.kind {
            image.size_scale = scale;
        }
        self
    }

    /// Text only; ignored for images.
    pub fn with_font(mut self, font_size: f64, color: Color) -> Self {
        if let OverlayKind::Text(text) = &mut self.kind {
            text.font_size = font_size;
            text.color = color;
        }
        self
    }
}

/// Partial update. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayPatch {
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub position: Option<NormalizedPoint>,
    /// Image base extent in pixels.
    pub extent: Option<PixelExtent>,
    /// Image extent as drawn, i.e. after `size_scale`. Converted back to a
    /// base extent with the overlay's resulting scale; wins over `extent`.
    pub drawn_extent: Option<PixelExtent>,
    pub size_scale: Option<f64>,
    pub text: Option<String>,
    pub font_size: Option<f64>,
    pub color: Option<Color>,
}

impl OverlayPatch {
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            position: Some(NormalizedPoint::new(x, y)),
            ..Self::default()
        }
    }

    pub fn time(start: f64, end: f64) -> Self {
        Self {
            start_time: Some(start),
            end_time: Some(end),
            ..Self::default()
        }
    }

    pub fn extent(width: f64, height: f64) -> Self {
        Self {
            extent: Some(PixelExtent::new(width, height)),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Overlay invariant violations. Rejected at the mutation boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid time window [{start}, {end}]: need 0 <= start < end")]
    InvalidTimeWindow { start: f64, end: f64 },

    #[error("extent {width}x{height} must be at least 1x1 pixels")]
    NonPositiveExtent { width: f64, height: f64 },

    #[error("{field} must be a finite number")]
    NonFinite { field: &'static str },

    #[error("invalid color {value:?}: expected #rgb or #rrggbb")]
    InvalidColor { value: String },

    #[error("{field} does not apply to {kind} overlays")]
    FieldMismatch {
        field: &'static str,
        kind: &'static str,
    },
}

impl From<ValidationError> for LayercutError {
    fn from(err: ValidationError) -> Self {
        LayercutError::validation(err.to_string())
    }
}

/// Format seconds as `m:ss.d` for display.
pub fn format_time(secs: f64) -> String {
    let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
    let minutes = (secs / 60.0).floor() as u64;
    let seconds = (secs % 60.0).floor() as u64;
    let tenths = ((secs % 1.0) * 10.0).floor() as u64;
    format!("{minutes}:{seconds:02}.{tenths}")
}
