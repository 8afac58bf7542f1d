//! Layercut Render Engine
//!
//! Turns an ordered overlay stack into a rendered video and drives the
//! interactive preview boundary.
//!
//! # Pipeline Architecture
//!
//! ```text
//! base video ──┐
//!              ├── stage inputs (MediaFetcher)
//! overlays ────┤         │
//!              │         ├── FilterPlan (scale + time-gated overlay chain)
//! audio ───────┘         │
//!                        ▼
//!                 Encoder (ffmpeg)
//!                        │
//!                        ▼
//!                  RenderArtifact
//! ```
//!
//! The preview side projects the same overlay snapshot into clip space
//! ([`compositor::PreviewScene`]) for any [`compositor::RenderAdapter`].

pub mod compositor;
pub mod encoder;
pub mod ffmpeg;
pub mod filter_graph;
pub mod media;
pub mod orchestrator;

pub use compositor::*;
pub use encoder::*;
pub use ffmpeg::FfmpegEncoder;
pub use filter_graph::*;
pub use media::*;
pub use orchestrator::*;
