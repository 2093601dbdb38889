//! Accumulator a tile read task submits its shapes through.

use std::collections::HashMap;
use std::sync::Arc;

use super::TileKey;
use crate::messaging::{Message, Priority, ThreadCommutator, ThreadName};
use crate::overlay::OverlayHandle;
use crate::shape::{GeometryBucket, MapShape, RenderState};

/// Geometry batches above this size are flushed to the render thread without
/// waiting for the tile to finish, so large tiles start appearing
/// incrementally.
const MAX_BUCKET_BYTES: usize = 128 * 1024;

/// Per-task sink for draw-ready data. Tessellates shapes into per-state
/// geometry buckets and collects overlay handles; everything is delivered as
/// messages, the render thread never shares memory with the workers.
pub struct EngineContext {
    key: TileKey,
    commutator: Arc<ThreadCommutator>,
    buckets: HashMap<RenderState, GeometryBucket, ahash::RandomState>,
    overlays: Vec<OverlayHandle>,
}

impl EngineContext {
    /// Creates a context for one tile read.
    pub fn new(key: TileKey, commutator: Arc<ThreadCommutator>) -> Self {
        Self {
            key,
            commutator,
            buckets: HashMap::default(),
            overlays: Vec::new(),
        }
    }

    /// Adds one shape produced from a feature.
    pub fn submit_shape(&mut self, shape: MapShape) {
        match shape {
            MapShape::Area(area) => {
                let state = area.state();
                let bucket = self
                    .buckets
                    .entry(state)
                    .or_insert_with(|| GeometryBucket::new(state));
                area.tessellate(bucket);
                self.maybe_flush(state);
            }
            MapShape::Line(line) => {
                let state = line.state();
                let bucket = self
                    .buckets
                    .entry(state)
                    .or_insert_with(|| GeometryBucket::new(state));
                line.tessellate(bucket);
                self.maybe_flush(state);
            }
            MapShape::Symbol(symbol) => {
                self.overlays.push(OverlayHandle {
                    id: symbol.id,
                    tile: self.key,
                    priority: symbol.priority,
                    anchor: symbol.anchor,
                    half_width: symbol.half_width,
                    half_height: symbol.half_height,
                });
            }
        }
    }

    /// Ships everything accumulated so far and reports completion.
    ///
    /// The overlay batch is posted even when empty: the frame composer treats
    /// its arrival as "this tile's overlays are final". Completion goes to the
    /// backend thread, which tracks the pending tile set.
    pub fn flush_and_finish(mut self) {
        let buckets = std::mem::take(&mut self.buckets);
        for (_, bucket) in buckets {
            if !bucket.is_empty() {
                self.post_bucket(bucket);
            }
        }

        self.commutator.post(
            ThreadName::Render,
            Priority::Normal,
            Message::FlushOverlays {
                key: self.key,
                handles: std::mem::take(&mut self.overlays),
            },
        );
        self.finish();
    }

    /// Reports completion of a canceled read, dropping the accumulated data.
    pub fn finish_canceled(self) {
        self.finish();
    }

    fn finish(self) {
        self.commutator.post(
            ThreadName::ResourceUpload,
            Priority::Normal,
            Message::FinishTileRead { key: self.key },
        );
    }

    fn maybe_flush(&mut self, state: RenderState) {
        let oversized = self
            .buckets
            .get(&state)
            .is_some_and(|b| b.approx_buffer_size() >= MAX_BUCKET_BYTES);
        if oversized {
            if let Some(bucket) = self.buckets.remove(&state) {
                self.post_bucket(bucket);
            }
        }
    }

    fn post_bucket(&self, bucket: GeometryBucket) {
        self.commutator.post(
            ThreadName::Render,
            Priority::Normal,
            Message::FlushTile {
                key: self.key,
                bucket,
            },
        );
    }

    #[cfg(test)]
    pub(crate) fn overlay_count(&self) -> usize {
        self.overlays.len()
    }

    #[cfg(test)]
    pub(crate) fn geometry_vertex_count(&self) -> usize {
        self.buckets.values().map(|b| b.vertices.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MessageAcceptor;
    use crate::shape::{AreaShape, SymbolShape};
    use nalgebra::Point2;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<(ThreadName, Message)>>,
    }

    struct NamedRecorder {
        name: ThreadName,
        recorder: Arc<Recorder>,
    }

    impl MessageAcceptor for NamedRecorder {
        fn can_receive(&self) -> bool {
            true
        }

        fn accept(&self, _priority: Priority, message: Message) {
            self.recorder.messages.lock().push((self.name, message));
        }
    }

    fn wired() -> (Arc<ThreadCommutator>, Arc<Recorder>) {
        let commutator = Arc::new(ThreadCommutator::new());
        let recorder = Arc::new(Recorder::default());
        for name in [ThreadName::Render, ThreadName::ResourceUpload] {
            commutator.register_thread(
                name,
                Arc::new(NamedRecorder {
                    name,
                    recorder: Arc::clone(&recorder),
                }),
            );
        }
        (commutator, recorder)
    }

    fn square(depth: i32) -> MapShape {
        MapShape::Area(AreaShape {
            points: vec![
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.0),
                Point2::new(1.0, 1.0),
            ],
            depth,
            is_3d: false,
        })
    }

    #[test]
    fn flush_posts_geometry_overlays_and_completion() {
        let (commutator, recorder) = wired();
        let key = TileKey::new(1, 2, 6).with_generation(3, 0);
        let mut context = EngineContext::new(key, commutator);

        context.submit_shape(square(0));
        context.submit_shape(square(1));
        context.submit_shape(MapShape::Symbol(SymbolShape {
            id: 9,
            anchor: Point2::new(0.5, 0.5),
            half_width: 10.0,
            half_height: 5.0,
            priority: 1,
        }));
        context.flush_and_finish();

        let messages = recorder.messages.lock();
        let tiles = messages
            .iter()
            .filter(|(name, m)| {
                *name == ThreadName::Render && matches!(m, Message::FlushTile { .. })
            })
            .count();
        // Two depths, two buckets.
        assert_eq!(tiles, 2);

        assert!(messages.iter().any(|(name, m)| *name == ThreadName::Render
            && matches!(m, Message::FlushOverlays { key: k, handles } if k.strict_eq(&key) && handles.len() == 1)));
        assert!(messages
            .iter()
            .any(|(name, m)| *name == ThreadName::ResourceUpload
                && matches!(m, Message::FinishTileRead { key: k } if k.strict_eq(&key))));
    }

    #[test]
    fn empty_overlay_batch_is_still_posted() {
        let (commutator, recorder) = wired();
        let context = EngineContext::new(TileKey::new(0, 0, 1), commutator);
        context.flush_and_finish();

        let messages = recorder.messages.lock();
        assert!(messages
            .iter()
            .any(|(_, m)| matches!(m, Message::FlushOverlays { handles, .. } if handles.is_empty())));
    }

    #[test]
    fn canceled_finish_skips_render_thread_entirely() {
        let (commutator, recorder) = wired();
        let mut context = EngineContext::new(TileKey::new(0, 0, 1), commutator);
        context.submit_shape(square(0));
        context.finish_canceled();

        let messages = recorder.messages.lock();
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            messages[0],
            (ThreadName::ResourceUpload, Message::FinishTileRead { .. })
        ));
    }
}
