//! Preview composition: the renderer-agnostic boundary.
//!
//! A [`PreviewScene`] is the store snapshot projected into clip space at a
//! single media time, in stacking order. Any preview backend (GPU, canvas,
//! terminal) implements [`RenderAdapter`] to draw it and to report back
//! finished gestures as [`OverlayEdit`]s. Adapters never own overlay state;
//! [`LayerHandles`] keeps their per-overlay resources keyed by id.

use std::collections::HashMap;

use serde::Serialize;

use layercut_common::error::LayercutResult;
use layercut_overlay_model::interaction::OverlayEdit;
use layercut_overlay_model::overlay::{MediaRef, OverlayId, OverlayKind};
use layercut_overlay_model::store::{OverlaySnapshot, OverlayStore};
use layercut_overlay_model::transform::{
    from_clip_space, normalized_from_canvas, to_clip_space, ClipPoint, ClipRect, FrameSize,
    NormalizedPoint,
};

/// One overlay as the preview should draw it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewLayer {
    pub overlay_id: OverlayId,
    pub stack_index: usize,
    pub kind: OverlayKind,
    pub rect: ClipRect,
    /// Whether the overlay's window contains the scene time.
    pub visible: bool,
}

/// The whole overlay stack at one media time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewScene {
    pub time_secs: f64,
    pub frame: FrameSize,
    pub layers: Vec<PreviewLayer>,
}

impl PreviewScene {
    /// Layers that should be drawn, bottom first.
    pub fn visible_layers(&self) -> impl Iterator<Item = &PreviewLayer> {
        self.layers.iter().filter(|layer| layer.visible)
    }

    /// Top-most visible overlay under a clip-space point.
    pub fn hit_test(&self, point: ClipPoint) -> Option<OverlayId> {
        self.layers
            .iter()
            .rev()
            .find(|layer| layer.visible && layer.rect.contains(point))
            .map(|layer| layer.overlay_id)
    }

    pub fn layer(&self, id: OverlayId) -> Option<&PreviewLayer> {
        self.layers.iter().find(|layer| layer.overlay_id == id)
    }
}

/// Project a snapshot into clip space at `time_secs`.
pub fn compose_preview(snapshot: &OverlaySnapshot, time_secs: f64) -> PreviewScene {
    let layers = snapshot
        .iter()
        .enumerate()
        .map(|(stack_index, overlay)| PreviewLayer {
            overlay_id: overlay.id(),
            stack_index,
            kind: overlay.kind().clone(),
            rect: to_clip_space(overlay.position(), overlay.half_extent(snapshot.frame)),
            visible: overlay.is_visible_at(time_secs),
        })
        .collect();

    PreviewScene {
        time_secs,
        frame: snapshot.frame,
        layers,
    }
}

/// A preview backend.
pub trait RenderAdapter {
    /// Draw `scene` over the base video at the scene's time.
    fn present(&mut self, base: &MediaRef, scene: &PreviewScene) -> LayercutResult<()>;

    /// Gestures finished since the last call.
    fn drain_edits(&mut self) -> Vec<OverlayEdit>;
}

/// Present the current store state and feed reported edits back into it.
///
/// Returns how many edits were applied. Edits for removed overlays and
/// edits that fail validation are dropped; the store stays authoritative.
pub fn pump_preview<A: RenderAdapter + ?Sized>(
    store: &OverlayStore,
    adapter: &mut A,
    base: &MediaRef,
    time_secs: f64,
) -> LayercutResult<usize> {
    let scene = compose_preview(&store.snapshot(), time_secs);
    adapter.present(base, &scene)?;

    let mut applied = 0;
    for edit in adapter.drain_edits() {
        match store.apply_edit(edit) {
            Ok(true) => applied += 1,
            Ok(false) => {
                tracing::debug!(overlay = %edit.overlay_id, "Dropping edit for removed overlay");
            }
            Err(err) => {
                tracing::warn!(overlay = %edit.overlay_id, error = %err, "Rejected preview edit");
            }
        }
    }
    Ok(applied)
}

/// Per-overlay renderer resources (sprites, textures, nodes), keyed by id.
#[derive(Debug)]
pub struct LayerHandles<H> {
    handles: HashMap<OverlayId, H>,
}

impl<H> Default for LayerHandles<H> {
    fn default() -> Self {
        Self {
            handles: HashMap::new(),
        }
    }
}

impl<H> LayerHandles<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create handles for new layers and release handles of layers that
    /// left the scene.
    pub fn reconcile(
        &mut self,
        scene: &PreviewScene,
        mut create: impl FnMut(&PreviewLayer) -> H,
        mut release: impl FnMut(OverlayId, H),
    ) {
        let stale: Vec<OverlayId> = self
            .handles
            .keys()
            .filter(|id| scene.layer(**id).is_none())
            .copied()
            .collect();
        for id in stale {
            if let Some(handle) = self.handles.remove(&id) {
                release(id, handle);
            }
        }

        for layer in &scene.layers {
            self.handles
                .entry(layer.overlay_id)
                .or_insert_with(|| create(layer));
        }
    }

    pub fn get(&self, id: OverlayId) -> Option<&H> {
        self.handles.get(&id)
    }

    pub fn get_mut(&mut self, id: OverlayId) -> Option<&mut H> {
        self.handles.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// An in-progress drag on a preview canvas.
///
/// Keeps the grab offset so the overlay does not jump to center on the
/// pointer when the drag starts off-center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragSession {
    pub overlay_id: OverlayId,
    grab_offset: (f64, f64),
}

impl DragSession {
    /// Start a drag at a canvas pixel position, if it lands on an overlay.
    pub fn begin(scene: &PreviewScene, px: f64, py: f64, canvas: (f64, f64)) -> Option<Self> {
        let pointer = normalized_from_canvas(px, py, canvas.0, canvas.1);
        let clip = ClipPoint {
            x: pointer.x * 2.0 - 1.0,
            y: -(pointer.y * 2.0 - 1.0),
        };
        let overlay_id = scene.hit_test(clip)?;
        let center = from_clip_space(scene.layer(overlay_id)?.rect.center);
        Some(Self {
            overlay_id,
            grab_offset: (center.x - pointer.x, center.y - pointer.y),
        })
    }

    /// Finish the drag; the store clamps the resulting center.
    pub fn release(self, px: f64, py: f64, canvas: (f64, f64)) -> OverlayEdit {
        let pointer = normalized_from_canvas(px, py, canvas.0, canvas.1);
        OverlayEdit::moved(
            self.overlay_id,
            NormalizedPoint::new(
                pointer.x + self.grab_offset.0,
                pointer.y + self.grab_offset.1,
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layercut_overlay_model::overlay::{OverlayDraft, OverlayPatch, TimeWindow};

    fn store_with_two() -> (OverlayStore, OverlayId, OverlayId) {
        let store = OverlayStore::new(FrameSize::new(1000, 1000));
        let bottom = store
            .add(
                OverlayDraft::image(MediaRef::path("bottom.png"))
                    .with_extent(400.0, 400.0)
                    .at(0.5, 0.5)
                    .during(TimeWindow::new(0.0, 10.0).unwrap()),
            )
            .unwrap();
        let top = store
            .add(
                OverlayDraft::image(MediaRef::path("top.png"))
                    .with_extent(100.0, 100.0)
                    .at(0.5, 0.5)
                    .during(TimeWindow::new(2.0, 4.0).unwrap()),
            )
            .unwrap();
        (store, bottom, top)
    }

    #[derive(Default)]
    struct RecordingAdapter {
        presented: Vec<PreviewScene>,
        pending: Vec<OverlayEdit>,
    }

    impl RenderAdapter for RecordingAdapter {
        fn present(&mut self, _base: &MediaRef, scene: &PreviewScene) -> LayercutResult<()> {
            self.presented.push(scene.clone());
            Ok(())
        }

        fn drain_edits(&mut self) -> Vec<OverlayEdit> {
            std::mem::take(&mut self.pending)
        }
    }

    #[test]
    fn test_scene_uses_clip_space() {
        let (store, bottom, _) = store_with_two();
        let scene = compose_preview(&store.snapshot(), 0.0);
        let layer = scene.layer(bottom).unwrap();
        assert_eq!(layer.rect.center, ClipPoint { x: 0.0, y: 0.0 });
        assert!((layer.rect.half_w - 0.4).abs() < 1e-9);
        assert_eq!(layer.stack_index, 0);
    }

    #[test]
    fn test_visibility_follows_time_window() {
        let (store, bottom, _) = store_with_two();
        let early = compose_preview(&store.snapshot(), 1.0);
        let ids: Vec<_> = early.visible_layers().map(|l| l.overlay_id).collect();
        assert_eq!(ids, vec![bottom]);

        let during = compose_preview(&store.snapshot(), 3.0);
        assert_eq!(during.visible_layers().count(), 2);
    }

    #[test]
    fn test_hit_test_prefers_top_of_stack() {
        let (store, bottom, top) = store_with_two();
        let center = ClipPoint { x: 0.0, y: 0.0 };
        let edge = ClipPoint { x: 0.3, y: 0.0 };

        let scene = compose_preview(&store.snapshot(), 3.0);
        assert_eq!(scene.hit_test(center), Some(top));
        assert_eq!(scene.hit_test(edge), Some(bottom));
        assert_eq!(scene.hit_test(ClipPoint { x: 0.95, y: 0.95 }), None);

        let hidden_top = compose_preview(&store.snapshot(), 5.0);
        assert_eq!(hidden_top.hit_test(center), Some(bottom));
    }

    #[test]
    fn test_drag_keeps_grab_offset() {
        let (store, bottom, _) = store_with_two();
        let scene = compose_preview(&store.snapshot(), 0.0);

        // Grab 100px right of center on a 500px canvas, drop 50px further left.
        let drag = DragSession::begin(&scene, 300.0, 250.0, (500.0, 500.0)).unwrap();
        assert_eq!(drag.overlay_id, bottom);
        let edit = drag.release(250.0, 250.0, (500.0, 500.0));

        store.apply_edit(edit).unwrap();
        let p = store.get(bottom).unwrap().position();
        assert!((p.x - 0.4).abs() < 1e-9);
        assert!((p.y - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_pump_applies_edits_and_skips_stale_ids() {
        let (store, bottom, top) = store_with_two();
        store.remove(top);

        let mut adapter = RecordingAdapter {
            pending: vec![
                OverlayEdit::moved(bottom, NormalizedPoint::new(0.3, 0.3)),
                OverlayEdit::moved(top, NormalizedPoint::new(0.1, 0.1)),
            ],
            ..RecordingAdapter::default()
        };
        let applied = pump_preview(&store, &mut adapter, &MediaRef::path("clip.mp4"), 0.0).unwrap();
        assert_eq!(applied, 1);
        assert_eq!(adapter.presented.len(), 1);
        assert_eq!(adapter.presented[0].layers.len(), 1);

        let p = store.get(bottom).unwrap().position();
        assert!((p.x - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_layer_handles_follow_store() {
        let (store, bottom, top) = store_with_two();
        let mut handles: LayerHandles<String> = LayerHandles::new();
        let mut released = Vec::new();

        let scene = compose_preview(&store.snapshot(), 0.0);
        handles.reconcile(&scene, |layer| format!("sprite-{}", layer.overlay_id), |id, _| released.push(id));
        assert_eq!(handles.len(), 2);
        assert_eq!(handles.get(top).map(String::as_str), Some("sprite-overlay-2"));

        store.remove(top);
        store
            .update(bottom, &OverlayPatch::position(0.4, 0.4))
            .unwrap();
        let scene = compose_preview(&store.snapshot(), 0.0);
        handles.reconcile(&scene, |_| unreachable!("bottom keeps its handle"), |id, _| released.push(id));

        assert_eq!(released, vec![top]);
        assert_eq!(handles.len(), 1);
        assert!(handles.get(bottom).is_some());
    }
}
