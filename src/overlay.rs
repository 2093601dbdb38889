//! Collision resolution for screen-space overlays (labels and icons).
//!
//! Overlays are placed greedily in priority order: a handle is accepted only
//! if its screen box does not intersect any already accepted box beyond the
//! configured tolerance. Ties in priority resolve by ascending handle id so
//! that placement does not depend on tile-read completion order.

use nalgebra::Point2;
use rstar::{RTree, RTreeObject, AABB};

use crate::tile::TileKey;
use crate::view::{Rect, ScreenState};

/// One screen-space anchored overlay produced by a tile read.
#[derive(Debug, Clone)]
pub struct OverlayHandle {
    /// Stable id of the overlay, derived from its source feature. Doubles as
    /// the deterministic tie-break key for equal priorities.
    pub id: u64,
    /// Tile the overlay was read from.
    pub tile: TileKey,
    /// Placement priority; higher priority wins conflicts.
    pub priority: u16,
    /// Anchor position in map units.
    pub anchor: Point2<f64>,
    /// Half extent of the overlay box in pixels.
    pub half_width: f64,
    /// Half extent of the overlay box in pixels.
    pub half_height: f64,
}

impl OverlayHandle {
    /// Screen-space bounding box of the overlay for the given camera state.
    pub fn screen_rect(&self, screen: &ScreenState) -> Rect {
        let center = screen.map_to_screen(self.anchor);
        Rect::new(
            center.x - self.half_width,
            center.y - self.half_height,
            center.x + self.half_width,
            center.y + self.half_height,
        )
    }
}

struct PlacedOverlay {
    rect: Rect,
}

impl RTreeObject for PlacedOverlay {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.rect.x_min, self.rect.y_min],
            [self.rect.x_max, self.rect.y_max],
        )
    }
}

/// Greedy priority-ordered overlay placement.
pub struct OverlayTree {
    tolerance: f64,
    accepted: RTree<PlacedOverlay>,
}

impl OverlayTree {
    /// Creates a tree with the given overlap tolerance: the fraction of the
    /// smaller box's area two boxes may share before they conflict. 0.0
    /// rejects any overlap.
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            accepted: RTree::new(),
        }
    }

    /// Places the given handles against an empty screen and returns the ids
    /// of the accepted ones, in acceptance order.
    ///
    /// Handles are considered in descending priority order; equal priorities
    /// are ordered by ascending id.
    pub fn place(&mut self, handles: &[OverlayHandle], screen: &ScreenState) -> Vec<u64> {
        self.accepted = RTree::new();

        let mut order: Vec<&OverlayHandle> = handles.iter().collect();
        order.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let mut accepted_ids = Vec::new();
        for handle in order {
            let rect = handle.screen_rect(screen);
            if self.conflicts(&rect) {
                continue;
            }

            self.accepted.insert(PlacedOverlay { rect });
            accepted_ids.push(handle.id);
        }

        accepted_ids
    }

    fn conflicts(&self, rect: &Rect) -> bool {
        let envelope = AABB::from_corners([rect.x_min, rect.y_min], [rect.x_max, rect.y_max]);
        for placed in self.accepted.locate_in_envelope_intersecting(&envelope) {
            let overlap = rect.intersection_area(&placed.rect);
            let allowed = self.tolerance * rect.area().min(placed.rect.area());
            if overlap > allowed {
                return true;
            }
        }

        false
    }
}
