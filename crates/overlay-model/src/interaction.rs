//! Inbound edits reported by a preview renderer.
//!
//! Renderers report finished gestures only: a drag release yields the new
//! normalized center, a resize release yields the new pixel extent as drawn
//! (after `size_scale`). Both go through the same clamping `update` path as
//! any other edit.

use serde::{Deserialize, Serialize};

use crate::overlay::{OverlayId, OverlayPatch, ValidationError};
use crate::store::OverlayStore;
use crate::transform::{NormalizedPoint, PixelExtent};

/// What a finished gesture changed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum EditChange {
    /// Drag released at this normalized center.
    Position(NormalizedPoint),
    /// Resize released with this on-screen pixel extent.
    Extent(PixelExtent),
}

/// A single renderer-reported edit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayEdit {
    pub overlay_id: OverlayId,
    #[serde(flatten)]
    pub change: EditChange,
}

impl OverlayEdit {
    pub fn moved(overlay_id: OverlayId, to: NormalizedPoint) -> Self {
        Self {
            overlay_id,
            change: EditChange::Position(to),
        }
    }

    pub fn resized(overlay_id: OverlayId, extent: PixelExtent) -> Self {
        Self {
            overlay_id,
            change: EditChange::Extent(extent),
        }
    }

    fn to_patch(self) -> OverlayPatch {
        match self.change {
            EditChange::Position(p) => OverlayPatch {
                position: Some(p),
                ..OverlayPatch::default()
            },
            EditChange::Extent(e) => OverlayPatch {
                drawn_extent: Some(e),
                ..OverlayPatch::default()
            },
        }
    }
}

impl OverlayStore {
    /// Apply a renderer edit. Same contract as [`OverlayStore::update`].
    pub fn apply_edit(&self, edit: OverlayEdit) -> Result<bool, ValidationError> {
        self.update(edit.overlay_id, &edit.to_patch())
    }
}
