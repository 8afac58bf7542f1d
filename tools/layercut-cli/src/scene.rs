//! Scene files: a JSON description of one render.
//!
//! ```json
//! {
//!   "video": "clip.mp4",
//!   "audio": "music.mp3",
//!   "overlays": [
//!     { "type": "image", "source": "logo.png", "width": 200, "height": 200, "x": 0.5, "y": 0.5, "start": 0, "end": 2 },
//!     { "type": "text", "text": "Hello", "font_size": 48, "color": "#ffcc00", "y": 0.85, "start": 1 }
//!   ]
//! }
//! ```
//!
//! Relative paths resolve against the scene file's directory. `width` and
//! `height` of the base video are probed with ffprobe when omitted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use layercut_overlay_model::overlay::{
    Color, MediaRef, OverlayDraft, TimeWindow, DEFAULT_FONT_SIZE, DEFAULT_IMAGE_EXTENT,
};
use layercut_overlay_model::store::OverlayStore;
use layercut_overlay_model::transform::FrameSize;
use layercut_render_engine::ffmpeg::probe_video_dimensions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneFile {
    pub video: MediaRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<MediaRef>,
    #[serde(default)]
    pub overlays: Vec<SceneOverlay>,
}

/// Where and when an overlay shows. Omitted fields take editor defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SceneOverlay {
    Image {
        source: MediaRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<f64>,
        #[serde(flatten)]
        placement: Placement,
    },
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        font_size: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<Color>,
        #[serde(flatten)]
        placement: Placement,
    },
}

impl SceneOverlay {
    fn to_draft(&self) -> anyhow::Result<OverlayDraft> {
        let (draft, placement) = match self {
            SceneOverlay::Image {
                source,
                width,
                height,
                size,
                placement,
            } => (
                OverlayDraft::image(source.clone())
                    .with_extent(
                        width.unwrap_or(DEFAULT_IMAGE_EXTENT),
                        height.unwrap_or(DEFAULT_IMAGE_EXTENT),
                    )
                    .with_size_scale(size.unwrap_or(1.0)),
                placement,
            ),
            SceneOverlay::Text {
                text,
                font_size,
                color,
                placement,
            } => (
                OverlayDraft::text(text.clone()).with_font(
                    font_size.unwrap_or(DEFAULT_FONT_SIZE),
                    color.unwrap_or(Color::WHITE),
                ),
                placement,
            ),
        };

        let start = placement.start.unwrap_or(0.0);
        let draft = draft.at(placement.x.unwrap_or(0.5), placement.y.unwrap_or(0.5));
        Ok(match placement.end {
            Some(end) => draft.during(TimeWindow::new(start, end)?),
            None => draft.starting_at(start),
        })
    }
}

/// A parsed scene plus the directory its relative paths resolve against.
#[derive(Debug, Clone)]
pub struct LoadedScene {
    pub file: SceneFile,
    pub root: PathBuf,
}

impl LoadedScene {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read scene {}: {e}", path.display()))?;
        let file: SceneFile = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse scene {}: {e}", path.display()))?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self { file, root })
    }

    /// Base video frame size, probing the file when the scene omits it.
    pub fn frame(&self) -> anyhow::Result<FrameSize> {
        if let (Some(width), Some(height)) = (self.file.width, self.file.height) {
            return Ok(FrameSize::new(width, height));
        }
        let MediaRef::Path(path) = &self.file.video else {
            anyhow::bail!("Scene must give width and height for remote video {}", self.file.video);
        };
        let resolved = self.root.join(path);
        let (width, height) = probe_video_dimensions(&resolved).ok_or_else(|| {
            anyhow::anyhow!(
                "Could not probe dimensions of {} (is ffprobe installed?)",
                resolved.display()
            )
        })?;
        Ok(FrameSize::new(width, height))
    }

    /// Build an overlay store in scene order.
    pub fn build_store(&self, frame: FrameSize) -> anyhow::Result<OverlayStore> {
        let store = OverlayStore::new(frame);
        for (index, overlay) in self.file.overlays.iter().enumerate() {
            let draft = overlay
                .to_draft()
                .map_err(|e| anyhow::anyhow!("Overlay #{index}: {e}"))?;
            store
                .add(draft)
                .map_err(|e| anyhow::anyhow!("Overlay #{index}: {e}"))?;
        }
        Ok(store)
    }
}

/// Starter scene written by `layercut init`.
pub fn template(video: &str) -> SceneFile {
    SceneFile {
        video: MediaRef::from(video.to_string()),
        width: None,
        height: None,
        audio: None,
        overlays: vec![
            SceneOverlay::Image {
                source: MediaRef::path("logo.png"),
                width: Some(200.0),
                height: Some(200.0),
                size: Some(1.0),
                placement: Placement {
                    x: Some(0.9),
                    y: Some(0.1),
                    start: Some(0.0),
                    end: Some(5.0),
                },
            },
            SceneOverlay::Text {
                text: "Hello from layercut".to_string(),
                font_size: Some(48.0),
                color: Some(Color::WHITE),
                placement: Placement {
                    x: Some(0.5),
                    y: Some(0.85),
                    start: Some(1.0),
                    end: Some(4.0),
                },
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layercut_overlay_model::overlay::OverlayKind;

    fn parse(json: &str) -> LoadedScene {
        LoadedScene {
            file: serde_json::from_str(json).unwrap(),
            root: PathBuf::from("/scenes"),
        }
    }

    #[test]
    fn test_scene_builds_store_in_order() {
        let scene = parse(
            r##"{
                "video": "clip.mp4",
                "width": 1920,
                "height": 1080,
                "overlays": [
                    { "type": "image", "source": "logo.png", "width": 200, "height": 200, "start": 0, "end": 2 },
                    { "type": "text", "text": "Hi", "font_size": 48, "color": "#ffcc00", "y": 0.85, "start": 1 }
                ]
            }"##,
        );
        let frame = scene.frame().unwrap();
        assert_eq!(frame, FrameSize::new(1920, 1080));

        let snapshot = scene.build_store(frame).unwrap().snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(matches!(snapshot[0].kind(), OverlayKind::Image(_)));
        let OverlayKind::Text(text) = snapshot[1].kind() else {
            panic!("expected text overlay");
        };
        assert_eq!(text.font_size, 48.0);
        assert_eq!(text.color.to_string(), "#ffcc00");
        assert_eq!(snapshot[1].time_window().start(), 1.0);
        assert_eq!(snapshot[1].time_window().end(), 3.0);
    }

    #[test]
    fn test_bad_window_names_the_overlay() {
        let scene = parse(
            r#"{ "video": "clip.mp4", "width": 640, "height": 360,
                 "overlays": [ { "type": "text", "text": "x" },
                               { "type": "text", "text": "y", "start": 4, "end": 1 } ] }"#,
        );
        let err = scene.build_store(scene.frame().unwrap()).unwrap_err();
        assert!(err.to_string().starts_with("Overlay #1"));
    }

    #[test]
    fn test_remote_video_requires_dimensions() {
        let scene = parse(r#"{ "video": "https://example.com/clip.mp4" }"#);
        assert!(scene.frame().is_err());
    }

    #[test]
    fn test_template_parses_back() {
        let json = serde_json::to_string_pretty(&template("clip.mp4")).unwrap();
        let scene = parse(&json);
        assert_eq!(scene.file.overlays.len(), 2);
        assert!(scene.build_store(FrameSize::new(1280, 720)).is_ok());
    }
}
