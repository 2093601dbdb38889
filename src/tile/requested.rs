//! Shared snapshot of the tile set the frontend wants rendered.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use super::TileKey;
use crate::view::ScreenState;

/// One coverage request produced by the frontend after a camera change.
#[derive(Debug, Clone)]
pub struct TileRequest {
    /// Tiles to render, stamped with the coverage generations.
    pub tiles: BTreeSet<TileKey>,
    /// Camera state the coverage was computed for.
    pub screen: ScreenState,
    /// Whether buildings are extruded into the 3d layer.
    pub buildings_3d: bool,
    /// Drop finished tiles and re-read everything.
    pub force_refresh: bool,
}

/// Mailbox between the frontend and the backend thread.
///
/// The frontend stores the latest request here and posts a lightweight
/// `UpdateReadManager` message; the backend takes the snapshot when it gets
/// around to it. Storing a new request before the previous one was taken
/// simply replaces it, so a burst of camera changes collapses into one
/// pipeline reconciliation.
#[derive(Default)]
pub struct RequestedTiles {
    request: Mutex<Option<TileRequest>>,
}

impl RequestedTiles {
    /// Creates an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored request with a newer one.
    pub fn set(&self, request: TileRequest) {
        *self.request.lock() = Some(request);
    }

    /// Takes the stored request, leaving the mailbox empty.
    pub fn take(&self) -> Option<TileRequest> {
        self.request.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(zoom: u8) -> TileRequest {
        TileRequest {
            tiles: BTreeSet::from([TileKey::new(0, 0, zoom)]),
            screen: ScreenState::default(),
            buildings_3d: false,
            force_refresh: false,
        }
    }

    #[test]
    fn later_request_replaces_earlier_one() {
        let requested = RequestedTiles::new();
        requested.set(request(3));
        requested.set(request(7));

        let taken = requested.take().expect("request missing");
        assert_eq!(taken.tiles.first().map(|t| t.zoom), Some(7));
        assert!(requested.take().is_none());
    }
}
