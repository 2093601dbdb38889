//! Uploaded geometry of one (tile, render state) pair.

use std::cmp::Ordering;

use crate::shape::{GeometryBucket, RenderState};
use crate::tile::TileKey;

/// Geometry of one tile in one graphics state, as held by the frame composer.
///
/// Groups are never deleted mid-frame; a group belonging to a tile that left
/// the coverage is marked and reaped at the start of the next frame, after
/// the frame that referenced it was presented.
pub struct RenderGroup {
    state: RenderState,
    key: TileKey,
    buckets: Vec<GeometryBucket>,
    pending_delete: bool,
}

impl RenderGroup {
    /// Creates an empty group.
    pub fn new(state: RenderState, key: TileKey) -> Self {
        Self {
            state,
            key,
            buckets: Vec::new(),
            pending_delete: false,
        }
    }

    /// Tile the group belongs to, generations included.
    pub fn key(&self) -> TileKey {
        self.key
    }

    /// Graphics state of the group.
    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Appends one uploaded geometry batch.
    pub fn add_bucket(&mut self, bucket: GeometryBucket) {
        self.buckets.push(bucket);
    }

    /// The group's geometry batches.
    pub fn buckets(&self) -> &[GeometryBucket] {
        &self.buckets
    }

    /// Schedules the group for deletion at the next frame boundary.
    pub fn mark_for_deletion(&mut self) {
        self.pending_delete = true;
    }

    /// Returns true once the group is scheduled for deletion.
    pub fn is_pending_delete(&self) -> bool {
        self.pending_delete
    }
}

/// Submission order of render groups: by graphics state (layer first, then
/// depth) so state switches are minimized, then by tile for determinism.
pub fn draw_order(a: &RenderGroup, b: &RenderGroup) -> Ordering {
    a.state.cmp(&b.state).then_with(|| a.key.strict_cmp(&b.key))
}
