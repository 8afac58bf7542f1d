//! Filter-graph generation: overlay stack → ffmpeg `filter_complex` plan.
//!
//! Every overlay contributes two stages, in stack order:
//!
//! ```text
//! [k:v]scale=W:H[scaled_i]
//! [prev][scaled_i]overlay=X:Y:enable='between(t,START,END)'[v_i]
//! ```
//!
//! `prev` is `0:v` for the first overlay and `v_{i-1}` afterwards, so the
//! chain order is the stacking order. The container has no z-index; this
//! chain is the only place z-order exists.
//!
//! Generation is a pure function of its inputs. Labels, input file names
//! and number formatting are all derived deterministically.

use std::fmt;

use serde::Serialize;

use layercut_common::error::LayercutError;
use layercut_overlay_model::overlay::{
    MediaRef, Overlay, OverlayId, OverlayKind, TextPayload, ValidationError, TEXT_BASE_FONT_SIZE,
    TEXT_RASTER_BASE,
};
use layercut_overlay_model::transform::{top_left_offset, to_pixel_space, FrameSize};

/// The video every overlay is composited onto.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseVideo {
    pub input: MediaRef,
    pub frame: FrameSize,
}

/// What an encoder input carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum InputRole {
    BaseVideo,
    Overlay {
        overlay_id: OverlayId,
        stack_index: usize,
    },
    Audio,
}

/// Where an encoder input comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputSource {
    /// A media buffer staged under this file name.
    File { name: String, media: String },
    /// A synthesized lavfi source (text rasters).
    Lavfi { graph: String },
}

/// One numbered encoder input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanInput {
    pub index: usize,
    #[serde(flatten)]
    pub role: InputRole,
    pub source: InputSource,
}

/// Time gate of a composite stage. Inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnablePredicate {
    pub start: f64,
    pub end: f64,
}

impl EnablePredicate {
    /// Whether the layer is drawn at media time `t`.
    pub fn is_enabled(&self, t: f64) -> bool {
        t >= self.start && t <= self.end
    }
}

impl fmt::Display for EnablePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "between(t,{:.6},{:.6})", self.start, self.end)
    }
}

/// A single filter stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum FilterStage {
    Scale {
        input: String,
        width: u32,
        height: u32,
        output: String,
    },
    Composite {
        base: String,
        layer: String,
        x: i64,
        y: i64,
        enable: EnablePredicate,
        output: String,
    },
}

impl FilterStage {
    pub fn output(&self) -> &str {
        match self {
            FilterStage::Scale { output, .. } | FilterStage::Composite { output, .. } => output,
        }
    }
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterStage::Scale {
                input,
                width,
                height,
                output,
            } => write!(f, "[{input}]scale={width}:{height}[{output}]"),
            FilterStage::Composite {
                base,
                layer,
                x,
                y,
                enable,
                output,
            } => write!(
                f,
                "[{base}][{layer}]overlay={x}:{y}:enable='{enable}'[{output}]"
            ),
        }
    }
}

/// How the output video stream is produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum VideoOutput {
    /// Copy the base video stream untouched.
    Passthrough,
    /// Map this filter-graph label.
    Filtered { label: String },
}

/// Which audio ends up in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AudioMapping {
    /// The base video's own audio, if it has any.
    Base,
    /// An external track that replaces the base audio.
    External { input_index: usize },
}

impl AudioMapping {
    /// The `-map` specifier.
    pub fn map_spec(&self) -> String {
        match self {
            AudioMapping::Base => "0:a?".to_string(),
            AudioMapping::External { input_index } => format!("{input_index}:a:0"),
        }
    }
}

/// Everything the encoder needs besides the media bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterPlan {
    pub frame: FrameSize,
    pub inputs: Vec<PlanInput>,
    pub stages: Vec<FilterStage>,
    pub video: VideoOutput,
    pub audio: AudioMapping,
}

impl FilterPlan {
    /// Zero-overlay fast path: no filtering at all.
    pub fn is_passthrough(&self) -> bool {
        matches!(self.video, VideoOutput::Passthrough)
    }

    /// The `-filter_complex` argument, `None` on the passthrough path.
    pub fn filter_complex(&self) -> Option<String> {
        if self.stages.is_empty() {
            return None;
        }
        Some(
            self.stages
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(";"),
        )
    }

    /// The `-map` specifier of the output video stream.
    pub fn video_map_spec(&self) -> String {
        match &self.video {
            VideoOutput::Passthrough => "0:v".to_string(),
            VideoOutput::Filtered { label } => format!("[{label}]"),
        }
    }

    /// File name the base video is staged under.
    pub fn base_input_name(&self) -> Option<&str> {
        self.inputs.iter().find_map(|input| match (&input.role, &input.source) {
            (InputRole::BaseVideo, InputSource::File { name, .. }) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Composite stage of a given overlay, if present.
    pub fn composite_for(&self, id: OverlayId) -> Option<&FilterStage> {
        let stack_index = self.inputs.iter().find_map(|input| match input.role {
            InputRole::Overlay {
                overlay_id,
                stack_index,
            } if overlay_id == id => Some(stack_index),
            _ => None,
        })?;
        self.stages
            .iter()
            .filter(|stage| matches!(stage, FilterStage::Composite { .. }))
            .nth(stack_index)
    }
}

/// Generator precondition failures. Never produces a partial plan.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("base video frame {width}x{height} must be non-zero")]
    InvalidFrame { width: u32, height: u32 },

    #[error("overlay {id} at stack index {index} is invalid: {reason}")]
    InvalidOverlay {
        index: usize,
        id: OverlayId,
        reason: ValidationError,
    },
}

impl From<PlanError> for LayercutError {
    fn from(err: PlanError) -> Self {
        LayercutError::plan(err.to_string())
    }
}

/// Check every overlay invariant the generator relies on.
pub fn validate_overlays(overlays: &[Overlay]) -> Result<(), PlanError> {
    for (index, overlay) in overlays.iter().enumerate() {
        overlay
            .validate()
            .map_err(|reason| PlanError::InvalidOverlay {
                index,
                id: overlay.id(),
                reason,
            })?;
    }
    Ok(())
}

/// Staged file name of the base video.
pub fn base_input_name(media: &MediaRef) -> String {
    format!("input.{}", media.extension().unwrap_or_else(|| "mp4".into()))
}

/// Staged file name of the image overlay at `stack_index`.
pub fn overlay_input_name(stack_index: usize, media: &MediaRef) -> String {
    format!(
        "overlay_{stack_index}.{}",
        media.extension().unwrap_or_else(|| "png".into())
    )
}

/// Staged file name of the external audio track.
pub fn audio_input_name(media: &MediaRef) -> String {
    format!("audio.{}", media.extension().unwrap_or_else(|| "mp3".into()))
}

/// Compile an ordered overlay stack into a filter plan.
pub fn build_filter_plan(
    base: &BaseVideo,
    overlays: &[Overlay],
    audio: Option<&MediaRef>,
) -> Result<FilterPlan, PlanError> {
    if !base.frame.is_valid() {
        return Err(PlanError::InvalidFrame {
            width: base.frame.width,
            height: base.frame.height,
        });
    }
    validate_overlays(overlays)?;

    let mut inputs = Vec::with_capacity(overlays.len() + 2);
    inputs.push(PlanInput {
        index: 0,
        role: InputRole::BaseVideo,
        source: InputSource::File {
            name: base_input_name(&base.input),
            media: base.input.to_string(),
        },
    });

    let mut stages = Vec::with_capacity(overlays.len() * 2);
    let mut running = "0:v".to_string();

    for (stack_index, overlay) in overlays.iter().enumerate() {
        let input_index = stack_index + 1;
        let source = match overlay.kind() {
            OverlayKind::Image(image) => InputSource::File {
                name: overlay_input_name(stack_index, &image.source),
                media: image.source.to_string(),
            },
            OverlayKind::Text(text) => InputSource::Lavfi {
                graph: text_raster_source(text, overlay.time_window().end()),
            },
        };
        inputs.push(PlanInput {
            index: input_index,
            role: InputRole::Overlay {
                overlay_id: overlay.id(),
                stack_index,
            },
            source,
        });

        let (width, height) = overlay.pixel_extent().rounded();
        let scaled = format!("scaled_{stack_index}");
        stages.push(FilterStage::Scale {
            input: format!("{input_index}:v"),
            width,
            height,
            output: scaled.clone(),
        });

        let center = to_pixel_space(overlay.position(), base.frame);
        let (x, y) = top_left_offset(center, (width, height));
        let window = overlay.time_window();
        let output = format!("v{stack_index}");
        stages.push(FilterStage::Composite {
            base: running,
            layer: scaled,
            x,
            y,
            enable: EnablePredicate {
                start: window.start(),
                end: window.end(),
            },
            output: output.clone(),
        });
        running = output;
    }

    let audio_mapping = match audio {
        Some(track) => {
            let index = inputs.len();
            inputs.push(PlanInput {
                index,
                role: InputRole::Audio,
                source: InputSource::File {
                    name: audio_input_name(track),
                    media: track.to_string(),
                },
            });
            AudioMapping::External { input_index: index }
        }
        None => AudioMapping::Base,
    };

    let video = if stages.is_empty() {
        VideoOutput::Passthrough
    } else {
        VideoOutput::Filtered { label: running }
    };

    Ok(FilterPlan {
        frame: base.frame,
        inputs,
        stages,
        video,
        audio: audio_mapping,
    })
}

/// A transparent glyph canvas with the text centered on it. The scale
/// stage later resizes it to the overlay's derived extent.
fn text_raster_source(text: &TextPayload, end_secs: f64) -> String {
    format!(
        "color=c=black@0.0:s={w}x{h}:d={d:.6},format=rgba,drawtext=text={text}:expansion=none:fontsize={size}:fontcolor={color}:x=(w-text_w)/2:y=(h-text_h)/2",
        w = TEXT_RASTER_BASE.0 as u32,
        h = TEXT_RASTER_BASE.1 as u32,
        d = end_secs,
        text = escape_graph_value(&escape_option_value(&text.text)),
        size = TEXT_BASE_FONT_SIZE as u32,
        color = text.color.to_ffmpeg(),
    )
}

/// First escaping level: a filter option value.
fn escape_option_value(raw: &str) -> String {
    escape_chars(raw, &['\\', '\'', ':'])
}

/// Second escaping level: the filtergraph description.
fn escape_graph_value(raw: &str) -> String {
    escape_chars(raw, &['\\', '\'', '[', ']', ',', ';'])
}

fn escape_chars(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
