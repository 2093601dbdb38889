//! The backend (resource upload) thread delegate.
//!
//! The backend bridges the frontend's coverage requests into the tile read
//! pipeline and watches the pending tile set, announcing to the frontend when
//! a coverage is fully read.

use std::sync::Arc;
use std::time::Duration;

use crate::lifecycle::RendererDelegate;
use crate::messaging::{Message, MessageQueue, PopOutcome, Priority, ThreadCommutator, ThreadName};
use crate::provider::{GraphicsContext, MapDataProvider, StyleEngine};
use crate::tile::feature_index::MemoryFeatureIndex;
use crate::tile::read_manager::ReadManager;
use crate::tile::requested::RequestedTiles;

/// Message poll interval. Bounds how long the lifecycle harness waits for
/// the backend to notice an enable/disable request.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Delegate of the resource-upload thread.
pub struct BackendRenderer {
    commutator: Arc<ThreadCommutator>,
    requested: Arc<RequestedTiles>,
    read_manager: ReadManager,
    context: Option<Box<dyn GraphicsContext>>,
}

impl BackendRenderer {
    /// Creates the backend and its tile read pool.
    pub fn new(
        commutator: Arc<ThreadCommutator>,
        requested: Arc<RequestedTiles>,
        provider: Arc<dyn MapDataProvider>,
        style: Arc<dyn StyleEngine>,
        pool_size: Option<usize>,
    ) -> std::io::Result<Self> {
        let read_manager = ReadManager::new(
            Arc::clone(&commutator),
            provider,
            style,
            Arc::new(MemoryFeatureIndex::new()),
            pool_size,
        )?;

        Ok(Self {
            commutator,
            requested,
            read_manager,
            context: None,
        })
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::UpdateReadManager => {
                // Bursts of coverage changes collapse in the mailbox; only
                // the latest snapshot matters.
                if let Some(request) = self.requested.take() {
                    self.read_manager.update_coverage(request);
                    if self.read_manager.is_idle() {
                        self.announce_finish_reading();
                    }
                }
            }
            Message::InvalidateReadManagerRect(rect) => {
                self.read_manager.invalidate(rect);
            }
            Message::FinishTileRead { key } => {
                if self.read_manager.tile_finished(key) {
                    self.announce_finish_reading();
                }
            }
            other => {
                log::trace!("backend ignoring message {other:?}");
            }
        }
    }

    fn announce_finish_reading(&self) {
        self.commutator
            .post(ThreadName::Render, Priority::Normal, Message::FinishReading);
    }
}

impl RendererDelegate for BackendRenderer {
    fn frame(&mut self, queue: &MessageQueue) {
        match queue.pop_blocking(Some(POLL_TIMEOUT)) {
            PopOutcome::Message(message) => {
                self.handle_message(message);
                // Drain whatever else queued up before yielding.
                while let Some(message) = queue.try_pop() {
                    self.handle_message(message);
                }
            }
            PopOutcome::TimedOut | PopOutcome::Closed => {}
        }
    }

    fn on_context_create(&mut self, context: Box<dyn GraphicsContext>) {
        self.context = Some(context);
    }

    fn on_context_destroy(&mut self) {
        self.context = None;
    }

    fn release_resources(&mut self) {
        self.read_manager.stop();
    }
}
