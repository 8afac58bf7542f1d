//! Media fetching and input staging.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use layercut_common::error::{LayercutError, LayercutResult};
use layercut_overlay_model::overlay::{MediaRef, Overlay, OverlayKind};

use crate::filter_graph::{audio_input_name, base_input_name, overlay_input_name};

/// Resolves a [`MediaRef`] to its bytes.
#[async_trait::async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, media: &MediaRef) -> LayercutResult<Vec<u8>>;
}

/// Reads local files, resolving relative paths against `root`.
#[derive(Debug, Clone, Default)]
pub struct FsFetcher {
    root: Option<PathBuf>,
}

impl FsFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, media: &MediaRef) -> LayercutResult<PathBuf> {
        match media {
            MediaRef::Path(path) => Ok(match &self.root {
                Some(root) if path.is_relative() => root.join(path),
                _ => path.clone(),
            }),
            MediaRef::Url(url) => Err(LayercutError::unsupported(format!(
                "remote media is not supported by the filesystem fetcher: {url}"
            ))),
        }
    }
}

#[async_trait::async_trait]
impl MediaFetcher for FsFetcher {
    async fn fetch(&self, media: &MediaRef) -> LayercutResult<Vec<u8>> {
        let path = self.resolve(media)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(LayercutError::FileNotFound { path })
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Buffers already held in memory, e.g. uploads handed over by a host.
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    entries: HashMap<MediaRef, Arc<[u8]>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, media: MediaRef, bytes: impl Into<Arc<[u8]>>) {
        self.entries.insert(media, bytes.into());
    }

    pub fn with(mut self, media: MediaRef, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.insert(media, bytes);
        self
    }
}

#[async_trait::async_trait]
impl MediaFetcher for MemoryFetcher {
    async fn fetch(&self, media: &MediaRef) -> LayercutResult<Vec<u8>> {
        self.entries
            .get(media)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| LayercutError::FileNotFound {
                path: PathBuf::from(media.to_string()),
            })
    }
}

/// A media buffer under the file name the filter plan refers to it by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInput {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Fetch the base video, every image overlay and the optional audio track.
///
/// All fetches are attempted; if any fail the error lists every failure,
/// and nothing is returned.
pub async fn stage_inputs(
    fetcher: &dyn MediaFetcher,
    base: &MediaRef,
    overlays: &[Overlay],
    audio: Option<&MediaRef>,
) -> LayercutResult<Vec<StagedInput>> {
    let mut wanted: Vec<(String, String, &MediaRef)> = Vec::with_capacity(overlays.len() + 2);
    wanted.push((base_input_name(base), "base video".to_string(), base));
    for (stack_index, overlay) in overlays.iter().enumerate() {
        if let OverlayKind::Image(image) = overlay.kind() {
            wanted.push((
                overlay_input_name(stack_index, &image.source),
                format!("{} (stack index {stack_index})", overlay.id()),
                &image.source,
            ));
        }
    }
    if let Some(track) = audio {
        wanted.push((audio_input_name(track), "audio track".to_string(), track));
    }

    let mut staged = Vec::with_capacity(wanted.len());
    let mut failed = Vec::new();
    for (name, label, media) in wanted {
        match fetcher.fetch(media).await {
            Ok(bytes) => {
                tracing::debug!(input = %name, media = %media, bytes = bytes.len(), "Staged input");
                staged.push(StagedInput { name, bytes });
            }
            Err(err) => {
                tracing::warn!(input = %name, media = %media, error = %err, "Failed to fetch input");
                failed.push(format!("{label} {media}: {err}"));
            }
        }
    }

    if failed.is_empty() {
        Ok(staged)
    } else {
        Err(LayercutError::ResourceFetch { failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layercut_common::error::FailureKind;
    use layercut_overlay_model::overlay::OverlayDraft;
    use layercut_overlay_model::store::OverlayStore;
    use layercut_overlay_model::transform::FrameSize;

    fn overlays() -> Vec<Overlay> {
        let store = OverlayStore::new(FrameSize::new(640, 360));
        store
            .add(OverlayDraft::image(MediaRef::path("logo.png")))
            .unwrap();
        store.add(OverlayDraft::text("caption")).unwrap();
        store
            .add(OverlayDraft::image(MediaRef::path("badge.jpg")))
            .unwrap();
        store.snapshot().into_vec()
    }

    #[tokio::test]
    async fn test_stage_names_follow_stack_index() {
        let fetcher = MemoryFetcher::new()
            .with(MediaRef::path("clip.mov"), vec![1u8])
            .with(MediaRef::path("logo.png"), vec![2u8])
            .with(MediaRef::path("badge.jpg"), vec![3u8])
            .with(MediaRef::path("voice.m4a"), vec![4u8]);

        let audio = MediaRef::path("voice.m4a");
        let staged = stage_inputs(&fetcher, &MediaRef::path("clip.mov"), &overlays(), Some(&audio))
            .await
            .unwrap();
        let names: Vec<_> = staged.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["input.mov", "overlay_0.png", "overlay_2.jpg", "audio.m4a"]);
        assert_eq!(staged[2].bytes, vec![3u8]);
    }

    #[tokio::test]
    async fn test_every_failure_is_reported() {
        let fetcher = MemoryFetcher::new().with(MediaRef::path("clip.mp4"), vec![0u8]);
        let err = stage_inputs(&fetcher, &MediaRef::path("clip.mp4"), &overlays(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ResourceFetch);
        let LayercutError::ResourceFetch { failed } = err else {
            panic!("expected resource fetch error");
        };
        assert_eq!(failed.len(), 2);
        assert!(failed[0].contains("logo.png"));
        assert!(failed[1].contains("badge.jpg"));
    }

    #[tokio::test]
    async fn test_fs_fetcher_resolves_against_root() {
        let dir = std::env::temp_dir().join(format!("layercut-media-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("logo.png"), b"png").unwrap();

        let fetcher = FsFetcher::with_root(&dir);
        let bytes = fetcher.fetch(&MediaRef::path("logo.png")).await.unwrap();
        assert_eq!(bytes, b"png");

        let missing = fetcher.fetch(&MediaRef::path("nope.png")).await.unwrap_err();
        assert!(matches!(missing, LayercutError::FileNotFound { .. }));

        let remote = fetcher
            .fetch(&MediaRef::from("https://example.com/a.png".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(remote, LayercutError::Unsupported { .. }));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
