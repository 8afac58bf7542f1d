//! The authoritative, ordered overlay collection.
//!
//! Order is stacking order: later entries draw on top of earlier ones and
//! appear later in the filter chain. Every mutation runs entirely under one
//! write lock, so readers only ever see whole patches and concurrent
//! writers serialize.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::overlay::{Overlay, OverlayDraft, OverlayId, OverlayPatch, ValidationError};
use crate::transform::FrameSize;

#[derive(Debug)]
struct StoreState {
    frame: FrameSize,
    overlays: Vec<Overlay>,
}

/// Ordered overlay collection with identity-addressed mutation.
#[derive(Debug)]
pub struct OverlayStore {
    state: RwLock<StoreState>,
    next_id: AtomicU64,
}

impl OverlayStore {
    /// Create an empty store for a base video of the given size.
    pub fn new(frame: FrameSize) -> Self {
        Self {
            state: RwLock::new(StoreState {
                frame,
                overlays: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an overlay at the top of the stack and return its new id.
    pub fn add(&self, draft: OverlayDraft) -> Result<OverlayId, ValidationError> {
        let mut state = self.write();
        let mut overlay = Overlay {
            id: OverlayId::new(0),
            time_window: draft.time_window,
            position: draft.position,
            kind: draft.kind,
        };
        overlay.normalize(state.frame)?;
        overlay.id = OverlayId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let id = overlay.id;
        state.overlays.push(overlay);
        Ok(id)
    }

    /// Remove an overlay. Returns whether anything was removed; removing an
    /// unknown id is not an error.
    pub fn remove(&self, id: OverlayId) -> bool {
        let mut state = self.write();
        let before = state.overlays.len();
        state.overlays.retain(|o| o.id != id);
        state.overlays.len() != before
    }

    /// Apply a partial update. `Ok(false)` means the id was not found.
    /// On error the stored overlay is unchanged.
    pub fn update(&self, id: OverlayId, patch: &OverlayPatch) -> Result<bool, ValidationError> {
        let mut state = self.write();
        let frame = state.frame;
        let Some(slot) = state.overlays.iter_mut().find(|o| o.id == id) else {
            return Ok(false);
        };
        let next = slot.patched(patch, frame)?;
        *slot = next;
        Ok(true)
    }

    /// Move an overlay to `new_index` in the stacking order (clamped to the
    /// last slot). Returns `false` if the id is unknown.
    pub fn move_to(&self, id: OverlayId, new_index: usize) -> bool {
        let mut state = self.write();
        let Some(current) = state.overlays.iter().position(|o| o.id == id) else {
            return false;
        };
        let target = new_index.min(state.overlays.len() - 1);
        let overlay = state.overlays.remove(current);
        state.overlays.insert(target, overlay);
        true
    }

    /// Look up a single overlay by id.
    pub fn get(&self, id: OverlayId) -> Option<Overlay> {
        self.read().overlays.iter().find(|o| o.id == id).cloned()
    }

    /// Immutable copy of the current stack.
    pub fn snapshot(&self) -> OverlaySnapshot {
        let state = self.read();
        OverlaySnapshot {
            frame: state.frame,
            overlays: state.overlays.clone(),
        }
    }

    pub fn frame(&self) -> FrameSize {
        self.read().frame
    }

    /// Change the base frame size and re-clamp every overlay against it.
    pub fn set_frame(&self, frame: FrameSize) {
        let mut state = self.write();
        state.frame = frame;
        for overlay in &mut state.overlays {
            overlay.reclamp(frame);
        }
    }

    pub fn len(&self) -> usize {
        self.read().overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().overlays.is_empty()
    }
}

/// Point-in-time copy of the store, in stacking order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlaySnapshot {
    pub frame: FrameSize,
    overlays: Vec<Overlay>,
}

impl OverlaySnapshot {
    pub fn ids(&self) -> Vec<OverlayId> {
        self.overlays.iter().map(|o| o.id()).collect()
    }

    pub fn find(&self, id: OverlayId) -> Option<&Overlay> {
        self.overlays.iter().find(|o| o.id() == id)
    }

    pub fn into_vec(self) -> Vec<Overlay> {
        self.overlays
    }
}

impl Deref for OverlaySnapshot {
    type Target = [Overlay];

    fn deref(&self) -> &Self::Target {
        &self.overlays
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{MediaRef, OverlayKind, TimeWindow};
    use std::sync::Arc;

    use proptest::prelude::*;

    fn store() -> OverlayStore {
        OverlayStore::new(FrameSize::new(1920, 1080))
    }

    fn image(name: &str) -> OverlayDraft {
        OverlayDraft::image(MediaRef::path(name))
    }

    #[test]
    fn test_add_preserves_insertion_order() {
        let store = store();
        let a = store.add(image("a.png")).unwrap();
        let b = store.add(OverlayDraft::text("b")).unwrap();
        let c = store.add(image("c.png")).unwrap();
        assert_eq!(store.snapshot().ids(), vec![a, b, c]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_readd_after_remove_appends_at_tail() {
        let store = store();
        let a = store.add(image("a.png")).unwrap();
        let b = store.add(image("b.png")).unwrap();
        let c = store.add(image("c.png")).unwrap();

        assert!(store.remove(b));
        let d = store.add(image("b.png")).unwrap();
        assert_ne!(d, b);
        assert_eq!(store.snapshot().ids(), vec![a, c, d]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = store();
        let a = store.add(image("a.png")).unwrap();
        assert!(store.remove(a));
        assert!(!store.remove(a));
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_unknown_id_is_detectable_noop() {
        let store = store();
        let a = store.add(image("a.png")).unwrap();
        store.remove(a);
        assert_eq!(store.update(a, &OverlayPatch::position(0.2, 0.2)), Ok(false));
    }

    #[test]
    fn test_update_clamps_position() {
        let store = store();
        let a = store
            .add(image("a.png").with_extent(192.0, 108.0))
            .unwrap();
        assert_eq!(store.update(a, &OverlayPatch::position(1.0, -4.0)), Ok(true));
        let overlay = store.get(a).unwrap();
        assert!((overlay.position().x - 0.95).abs() < 1e-9);
        assert!((overlay.position().y - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_rejected_update_leaves_store_unchanged() {
        let store = store();
        let a = store.add(image("a.png")).unwrap();
        let before = store.snapshot();

        let bad_window = OverlayPatch::time(3.0, 1.0);
        assert!(store.update(a, &bad_window).is_err());
        let bad_extent = OverlayPatch::extent(0.0, 10.0);
        assert!(store.update(a, &bad_extent).is_err());
        let nan = OverlayPatch::position(f64::NAN, 0.5);
        assert!(store.update(a, &nan).is_err());

        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_add_rejects_invalid_draft() {
        let store = store();
        let result = store.add(image("a.png").with_extent(-5.0, 10.0));
        assert!(matches!(
            result,
            Err(ValidationError::NonPositiveExtent { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_move_to_reorders_atomically() {
        let store = store();
        let a = store.add(image("a.png")).unwrap();
        let b = store.add(image("b.png")).unwrap();
        let c = store.add(image("c.png")).unwrap();

        assert!(store.move_to(c, 0));
        assert_eq!(store.snapshot().ids(), vec![c, a, b]);
        assert!(store.move_to(c, 99));
        assert_eq!(store.snapshot().ids(), vec![a, b, c]);

        store.remove(b);
        assert!(!store.move_to(b, 0));
    }

    #[test]
    fn test_set_frame_reclamps() {
        let store = store();
        let a = store
            .add(image("a.png").with_extent(200.0, 200.0).at(0.05, 0.5))
            .unwrap();
        store.set_frame(FrameSize::new(400, 400));
        let overlay = store.get(a).unwrap();
        assert!((overlay.position().x - 0.25).abs() < 1e-9);
        assert_eq!(store.frame(), FrameSize::new(400, 400));

        // A frame smaller than the overlay pins it to the midpoint and keeps
        // its extent.
        store.set_frame(FrameSize::new(100, 100));
        let overlay = store.get(a).unwrap();
        assert_eq!(overlay.position().x, 0.5);
        assert_eq!(overlay.position().y, 0.5);
        assert_eq!(overlay.pixel_extent().width, 200.0);
    }

    #[test]
    fn test_snapshot_is_detached_from_later_mutations() {
        let store = store();
        let a = store.add(image("a.png")).unwrap();
        let snap = store.snapshot();
        store.update(a, &OverlayPatch::time(5.0, 6.0)).unwrap();
        assert_eq!(
            snap.find(a).unwrap().time_window(),
            TimeWindow::starting_at(0.0)
        );
    }

    #[test]
    fn test_concurrent_updates_never_interleave_fields() {
        for _ in 0..50 {
            let store = Arc::new(store());
            let id = store.add(image("a.png").with_extent(10.0, 10.0)).unwrap();

            let first = OverlayPatch {
                start_time: Some(1.0),
                end_time: Some(3.0),
                position: Some(crate::transform::NormalizedPoint::new(0.3, 0.3)),
                size_scale: Some(2.0),
                ..OverlayPatch::default()
            };
            let second = OverlayPatch {
                start_time: Some(5.0),
                end_time: Some(7.0),
                position: Some(crate::transform::NormalizedPoint::new(0.7, 0.7)),
                size_scale: Some(3.0),
                ..OverlayPatch::default()
            };

            let handles: Vec<_> = [first, second]
                .into_iter()
                .map(|patch| {
                    let store = Arc::clone(&store);
                    std::thread::spawn(move || store.update(id, &patch).unwrap())
                })
                .collect();
            for handle in handles {
                assert!(handle.join().unwrap());
            }

            let overlay = store.get(id).unwrap();
            let OverlayKind::Image(payload) = overlay.kind() else {
                panic!("expected image");
            };
            let start = overlay.time_window().start();
            let x = overlay.position().x;
            let fully_first = start == 1.0 && x == 0.3 && payload.size_scale == 2.0;
            let fully_second = start == 5.0 && x == 0.7 && payload.size_scale == 3.0;
            assert!(fully_first || fully_second, "interleaved update: {overlay:?}");
        }
    }

    proptest! {
        #[test]
        fn snapshot_order_matches_add_order(ops in proptest::collection::vec(any::<bool>(), 1..40)) {
            let store = store();
            let mut expected: Vec<OverlayId> = Vec::new();
            for add in ops {
                if add || expected.is_empty() {
                    expected.push(store.add(image("x.png")).unwrap());
                } else {
                    let victim = expected.remove(expected.len() / 2);
                    prop_assert!(store.remove(victim));
                }
            }
            prop_assert_eq!(store.snapshot().ids(), expected);
        }
    }
}
