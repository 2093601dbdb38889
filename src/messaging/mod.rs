//! Cross-thread messages and their delivery plumbing.
//!
//! The engine runs two long-lived renderer threads, each owning a
//! [`MessageQueue`]. Threads never share mutable rendering state; everything
//! crosses thread boundaries as a [`Message`] posted through the
//! [`ThreadCommutator`].

mod commutator;
mod queue;

pub use commutator::{MessageAcceptor, ThreadCommutator, ThreadName};
pub use queue::{MessageQueue, PopOutcome};

use crate::overlay::OverlayHandle;
use crate::shape::GeometryBucket;
use crate::tile::TileKey;
use crate::user_event::UserEvent;
use crate::view::{Rect, ScreenSize};

/// Delivery priority of a message. Within one priority messages keep posting
/// order; a higher priority always dequeues before a lower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Jumps the queue. Used for lifecycle-critical messages such as surface
    /// resize.
    High,
    /// Regular delivery.
    Normal,
    /// Delivered when nothing else is pending.
    Low,
}

/// A message delivered to a renderer thread.
#[derive(Debug, Clone)]
pub enum Message {
    /// The set of requested tiles changed; the backend must reconcile the
    /// read pipeline with the shared snapshot.
    UpdateReadManager,
    /// Map data inside the rectangle changed; finished tiles intersecting it
    /// must be re-read.
    InvalidateReadManagerRect(Rect),
    /// Tessellated geometry for one tile, posted by a read worker to the
    /// render thread.
    FlushTile {
        /// Tile the geometry belongs to, generations included.
        key: TileKey,
        /// The geometry batch.
        bucket: GeometryBucket,
    },
    /// Overlay handles produced by one tile read, posted to the render
    /// thread. Posted even when empty so the frame composer can tell a tile
    /// without overlays from one still being read.
    FlushOverlays {
        /// Tile the overlays belong to, generations included.
        key: TileKey,
        /// The overlay handles.
        handles: Vec<OverlayHandle>,
    },
    /// A read worker finished (or abandoned) the tile, posted to the
    /// resource-upload thread.
    FinishTileRead {
        /// The finished tile.
        key: TileKey,
    },
    /// Every tile of the current coverage finished reading.
    FinishReading,
    /// The rendering surface was resized.
    Resize(ScreenSize),
    /// A user interaction to apply between frames.
    UserEvent(UserEvent),
    /// Toggles extrusion of buildings into the 3d layer.
    SetBuildings3d(bool),
    /// Drops all rendered tiles and re-reads the current coverage.
    ForceRefresh {
        /// Also bump the user-marks generation of the requested tiles.
        update_user_marks: bool,
    },
}

impl Message {
    /// Returns true for messages whose handling requires a live graphics
    /// context. These are held back by the queue filter while the context is
    /// lost.
    pub fn is_graphics_context_dependent(&self) -> bool {
        matches!(
            self,
            Message::FlushTile { .. } | Message::FlushOverlays { .. }
        )
    }
}
