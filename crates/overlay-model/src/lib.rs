//! Layercut Overlay Model
//!
//! Defines the core data contracts for overlay editing:
//! - **Transform:** Conversions between normalized, clip and pixel space
//! - **Overlay:** The canonical image/text overlay type and its invariants
//! - **Store:** The ordered, single-writer overlay collection
//! - **Interaction:** Edits reported back by preview renderers
//!
//! Overlay positions are normalized to `[0.0, 1.0]` relative to the base
//! video frame so they survive preview resizes and differing output sizes.

pub mod interaction;
pub mod overlay;
pub mod store;
pub mod transform;

pub use interaction::*;
pub use overlay::*;
pub use store::*;
pub use transform::*;
