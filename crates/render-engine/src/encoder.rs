//! Encoder abstraction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use layercut_common::config::RenderDefaults;
use layercut_common::error::{LayercutError, LayercutResult};

use crate::filter_graph::FilterPlan;
use crate::media::StagedInput;

/// Progress fractions in `[0.0, 1.0]`, reported while an encode runs.
pub type ProgressSender = mpsc::UnboundedSender<f64>;

/// Output container/codec combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Mp4H264,
    Mp4H265,
    Webm,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Mp4H264 => "mp4-h264",
            OutputFormat::Mp4H265 => "mp4-h265",
            OutputFormat::Webm => "webm",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp4H264 | OutputFormat::Mp4H265 => "mp4",
            OutputFormat::Webm => "webm",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Mp4H264 | OutputFormat::Mp4H265 => "video/mp4",
            OutputFormat::Webm => "video/webm",
        }
    }

    /// Whether the container accepts the base video stream unchanged. WebM
    /// only holds VP8/VP9/AV1, so base videos are always re-encoded for it.
    pub fn can_copy_video(self) -> bool {
        match self {
            OutputFormat::Mp4H264 | OutputFormat::Mp4H265 => true,
            OutputFormat::Webm => false,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = LayercutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" | "mp4-h264" | "h264" => Ok(OutputFormat::Mp4H264),
            "mp4-h265" | "h265" | "hevc" => Ok(OutputFormat::Mp4H265),
            "webm" => Ok(OutputFormat::Webm),
            other => Err(LayercutError::config(format!(
                "unknown output format '{other}' (expected mp4-h264, mp4-h265 or webm)"
            ))),
        }
    }
}

/// Codec settings for one render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeSettings {
    pub format: OutputFormat,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub preset: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Mp4H264,
            video_bitrate_kbps: 8000,
            audio_bitrate_kbps: 192,
            preset: "medium".to_string(),
        }
    }
}

impl EncodeSettings {
    pub fn from_defaults(defaults: &RenderDefaults) -> LayercutResult<Self> {
        Ok(Self {
            format: defaults.format.parse()?,
            video_bitrate_kbps: defaults.video_bitrate_kbps,
            audio_bitrate_kbps: defaults.audio_bitrate_kbps,
            preset: defaults.preset.clone(),
        })
    }

    /// Codec arguments. Passthrough renders copy the video stream when the
    /// container allows it, so only audio is re-encoded.
    pub fn codec_args(&self, passthrough: bool) -> Vec<String> {
        let video_bitrate = format!("{}k", self.video_bitrate_kbps.max(500));
        let audio_bitrate = format!("{}k", self.audio_bitrate_kbps.max(64));

        let mut args: Vec<String> = Vec::new();
        if passthrough && self.format.can_copy_video() {
            args.extend(["-c:v".to_string(), "copy".to_string()]);
        } else {
            match self.format {
                OutputFormat::Mp4H264 => args.extend([
                    "-c:v".to_string(),
                    "libx264".to_string(),
                    "-preset".to_string(),
                    self.preset.clone(),
                    "-profile:v".to_string(),
                    "high".to_string(),
                    "-pix_fmt".to_string(),
                    "yuv420p".to_string(),
                    "-b:v".to_string(),
                    video_bitrate,
                ]),
                OutputFormat::Mp4H265 => args.extend([
                    "-c:v".to_string(),
                    "libx265".to_string(),
                    "-preset".to_string(),
                    self.preset.clone(),
                    "-pix_fmt".to_string(),
                    "yuv420p".to_string(),
                    "-b:v".to_string(),
                    video_bitrate,
                ]),
                OutputFormat::Webm => args.extend([
                    "-c:v".to_string(),
                    "libvpx-vp9".to_string(),
                    "-b:v".to_string(),
                    video_bitrate,
                ]),
            }
        }

        match self.format {
            OutputFormat::Mp4H264 | OutputFormat::Mp4H265 => args.extend([
                "-c:a".to_string(),
                "aac".to_string(),
                "-b:a".to_string(),
                audio_bitrate,
                "-movflags".to_string(),
                "+faststart".to_string(),
            ]),
            OutputFormat::Webm => args.extend([
                "-c:a".to_string(),
                "libopus".to_string(),
                "-b:a".to_string(),
                audio_bitrate,
            ]),
        }
        args
    }
}

/// Everything one encode needs.
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub job_id: u64,
    pub inputs: Vec<StagedInput>,
    pub plan: FilterPlan,
    pub settings: EncodeSettings,
}

/// Encoded output bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedOutput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Encoding backend (native ffmpeg, embedded codec library, remote service).
///
/// `init` and `dispose` bracket the backend's lifetime. `encode` may be
/// dropped mid-flight on cancellation; implementations must not leave a
/// child process running when that happens.
#[async_trait::async_trait]
pub trait Encoder: Send + Sync {
    /// Acquire whatever the backend needs (binary lookup, scratch space).
    async fn init(&mut self) -> LayercutResult<()>;

    /// Whether `init` has completed successfully.
    fn is_ready(&self) -> bool;

    /// Run one encode, reporting progress fractions on `progress`.
    async fn encode(&self, job: EncodeJob, progress: ProgressSender)
        -> LayercutResult<EncodedOutput>;

    /// Release backend resources. `init` may be called again afterwards.
    async fn dispose(&mut self) -> LayercutResult<()>;

    fn name(&self) -> &str;
}
