//! Tile identity and the tile reading pipeline.
//!
//! A tile is a fixed quad region of the map plane at a given zoom level, the
//! unit of streaming and caching. [`TileKey`] identifies a tile together with
//! the generation of the coverage pass that requested it; the submodules
//! implement the asynchronous read lifecycle that turns a requested tile set
//! into draw-ready geometry.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::view::{tile_rect, Rect};

pub mod engine_context;
pub mod feature_index;
pub mod info;
pub mod read_manager;
pub mod requested;

/// Identity of one quad tile of the visible region.
///
/// Equality, ordering and hashing ignore the generation counters, so a tile
/// set keyed by `TileKey` is keyed by position only. Where stale geometry must
/// never be confused with fresh geometry use [`TileKey::strict_eq`].
#[derive(Debug, Clone, Copy)]
pub struct TileKey {
    /// Tile column.
    pub x: i32,
    /// Tile row.
    pub y: i32,
    /// Zoom level of the tile.
    pub zoom: u8,
    /// Coverage pass that requested this tile. Advances monotonically every
    /// time the visible tile set changes.
    pub generation: u64,
    /// Generation of user mark data baked into this tile.
    pub user_marks_generation: u64,
}

impl TileKey {
    /// Creates a key with zero generations.
    pub fn new(x: i32, y: i32, zoom: u8) -> Self {
        Self {
            x,
            y,
            zoom,
            generation: 0,
            user_marks_generation: 0,
        }
    }

    /// Returns the same tile stamped with the given generations.
    pub fn with_generation(mut self, generation: u64, user_marks_generation: u64) -> Self {
        self.generation = generation;
        self.user_marks_generation = user_marks_generation;
        self
    }

    /// Map-space rectangle covered by this tile.
    pub fn map_rect(&self) -> Rect {
        tile_rect(self.x, self.y, self.zoom)
    }

    /// Equality that takes the generation counters into account. Used where
    /// geometry from a superseded coverage pass must be told apart from the
    /// current one.
    pub fn strict_eq(&self, other: &TileKey) -> bool {
        self == other
            && self.generation == other.generation
            && self.user_marks_generation == other.user_marks_generation
    }

    /// Ordering that includes the generation counters.
    pub fn strict_cmp(&self, other: &TileKey) -> Ordering {
        self.cmp(other)
            .then(self.generation.cmp(&other.generation))
            .then(self.user_marks_generation.cmp(&other.user_marks_generation))
    }
}

impl PartialEq for TileKey {
    fn eq(&self, other: &Self) -> bool {
        self.zoom == other.zoom && self.x == other.x && self.y == other.y
    }
}

impl Eq for TileKey {}

impl PartialOrd for TileKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TileKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.zoom
            .cmp(&other.zoom)
            .then(self.x.cmp(&other.x))
            .then(self.y.cmp(&other.y))
    }
}

impl Hash for TileKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.zoom.hash(state);
        self.x.hash(state);
        self.y.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn equality_ignores_generation() {
        let a = TileKey::new(1, 2, 10);
        let b = TileKey::new(1, 2, 10).with_generation(5, 1);

        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert!(!a.strict_eq(&b));
        assert_eq!(a.strict_cmp(&b), Ordering::Less);
    }

    #[test]
    fn tile_set_replaces_by_position() {
        let mut set = BTreeSet::new();
        set.insert(TileKey::new(1, 1, 5).with_generation(1, 0));

        // Same position with a newer generation is considered the same element.
        assert!(set.contains(&TileKey::new(1, 1, 5).with_generation(7, 0)));
        assert!(!set.insert(TileKey::new(1, 1, 5).with_generation(7, 0)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn ordering_is_zoom_then_position() {
        let mut keys = [
            TileKey::new(5, 0, 3),
            TileKey::new(0, 1, 2),
            TileKey::new(0, 0, 2),
        ];
        keys.sort();

        assert_eq!(keys[0], TileKey::new(0, 0, 2));
        assert_eq!(keys[1], TileKey::new(0, 1, 2));
        assert_eq!(keys[2], TileKey::new(5, 0, 3));
    }
}
