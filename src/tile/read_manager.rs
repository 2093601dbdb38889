//! Scheduling of tile read tasks over a worker pool.
//!
//! The read manager lives on the backend thread. It owns the in-flight task
//! set and a prioritized task queue consumed by a pool of worker threads.
//! Reconciling a new coverage against the running one cancels outdated tasks
//! and front-queues the tiles that are still wanted, so workers never spend
//! time on tiles the camera has already left behind.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use super::engine_context::EngineContext;
use super::feature_index::MemoryFeatureIndex;
use super::info::TileInfo;
use super::requested::TileRequest;
use super::TileKey;
use crate::messaging::ThreadCommutator;
use crate::provider::{MapDataProvider, StyleEngine};
use crate::view::Rect;

struct TaskQueueState {
    tasks: VecDeque<Arc<TileInfo>>,
    closed: bool,
}

/// Work queue shared by the backend thread and the read workers.
struct TaskQueue {
    state: Mutex<TaskQueueState>,
    available: Condvar,
}

impl TaskQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(TaskQueueState {
                tasks: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn push_back(&self, task: Arc<TileInfo>) {
        self.state.lock().tasks.push_back(task);
        self.available.notify_one();
    }

    fn push_front(&self, task: Arc<TileInfo>) {
        self.state.lock().tasks.push_front(task);
        self.available.notify_one();
    }

    /// Removes the queued (not yet started) task for the tile, if any.
    fn remove(&self, key: &TileKey) -> Option<Arc<TileInfo>> {
        let mut state = self.state.lock();
        let index = state.tasks.iter().position(|t| t.key() == *key)?;
        state.tasks.remove(index)
    }

    /// Blocks until a task is available. Returns `None` once the queue is
    /// closed and empty.
    fn pop_blocking(&self) -> Option<Arc<TileInfo>> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }
}

/// The tile read scheduler. All methods run on the backend thread.
pub struct ReadManager {
    queue: Arc<TaskQueue>,
    workers: Vec<JoinHandle<()>>,
    /// Tasks queued or running, keyed by tile position.
    in_flight: BTreeMap<TileKey, Arc<TileInfo>>,
    /// Tiles of the current coverage whose read completed.
    finished: BTreeSet<TileKey>,
    zoom: Option<u8>,
    buildings_3d: bool,
}

impl ReadManager {
    /// Creates the manager and spawns its worker pool.
    ///
    /// With `pool_size` unset the pool uses all cores except the two taken by
    /// the engine threads, with at least one worker.
    pub fn new(
        commutator: Arc<ThreadCommutator>,
        provider: Arc<dyn MapDataProvider>,
        style: Arc<dyn StyleEngine>,
        index: Arc<MemoryFeatureIndex>,
        pool_size: Option<usize>,
    ) -> std::io::Result<Self> {
        let pool_size = pool_size.unwrap_or_else(default_pool_size).max(1);
        let queue = Arc::new(TaskQueue::new());

        let workers = (0..pool_size)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let commutator = Arc::clone(&commutator);
                let provider = Arc::clone(&provider);
                let style = Arc::clone(&style);
                let index = Arc::clone(&index);
                std::thread::Builder::new()
                    .name(format!("tile-read-{worker}"))
                    .spawn(move || worker_loop(queue, commutator, provider, style, index))
            })
            .collect::<std::io::Result<Vec<_>>>()?;
        log::info!("tile read pool started with {pool_size} workers");

        Ok(Self {
            queue,
            workers,
            in_flight: BTreeMap::new(),
            finished: BTreeSet::new(),
            zoom: None,
            buildings_3d: false,
        })
    }

    /// Reconciles the pipeline with a new coverage request.
    ///
    /// A zoom change, a force refresh or a coverage with no tile in common
    /// with the current one restarts the pipeline from scratch. Otherwise the
    /// update is incremental: outdated tasks are canceled, tasks still wanted
    /// move to the front of the queue and only the newly visible tiles are
    /// enqueued behind them.
    pub fn update_coverage(&mut self, request: TileRequest) {
        let new_zoom = request
            .tiles
            .first()
            .map(|t| t.zoom)
            .unwrap_or_else(|| request.screen.zoom_level());

        let current_coverage = || {
            self.in_flight
                .keys()
                .chain(self.finished.iter())
                .any(|key| request.tiles.contains(key))
        };
        let cold = request.force_refresh
            || self.zoom != Some(new_zoom)
            || self.buildings_3d != request.buildings_3d
            || ((!self.in_flight.is_empty() || !self.finished.is_empty()) && !current_coverage());

        self.zoom = Some(new_zoom);
        self.buildings_3d = request.buildings_3d;

        if cold {
            log::debug!(
                "cold coverage update: {} tiles at zoom {new_zoom}",
                request.tiles.len()
            );
            self.cancel_all();
            for key in request.tiles {
                self.enqueue_back(key);
            }
            return;
        }

        let outdated: Vec<TileKey> = self
            .in_flight
            .keys()
            .filter(|key| !request.tiles.contains(*key))
            .copied()
            .collect();
        for key in outdated {
            self.cancel_tile(&key);
        }
        self.finished.retain(|key| request.tiles.contains(key));

        // Still wanted and not yet started: read these before the new
        // arrivals. Collected first and pushed in reverse so the block keeps
        // its order at the front of the queue.
        let still_queued: Vec<Arc<TileInfo>> = request
            .tiles
            .iter()
            .filter_map(|key| {
                let existing = self.in_flight.get(key)?;
                self.queue.remove(&existing.key())
            })
            .collect();
        for task in still_queued.into_iter().rev() {
            self.queue.push_front(task);
        }

        for key in request.tiles {
            if !self.in_flight.contains_key(&key) && !self.finished.contains(&key) {
                self.enqueue_back(key);
            }
        }
    }

    /// Re-reads the finished tiles intersecting the rectangle, after a map
    /// data change. Tasks already in flight read the data as it is now, so
    /// they are left alone.
    pub fn invalidate(&mut self, rect: Rect) {
        let affected: Vec<TileKey> = self
            .finished
            .iter()
            .filter(|key| key.map_rect().intersects(&rect))
            .copied()
            .collect();
        log::debug!("invalidating {} finished tiles", affected.len());

        for key in affected {
            self.finished.remove(&key);
            self.enqueue_back(key);
        }
    }

    /// Records the completion of one tile read. Completions of canceled
    /// (superseded) tasks are ignored via the strict generation check.
    /// Returns true when this completion emptied the in-flight set, which is
    /// the moment to announce the coverage as fully read.
    pub fn tile_finished(&mut self, key: TileKey) -> bool {
        match self.in_flight.get(&key) {
            Some(task) if task.key().strict_eq(&key) => {
                self.in_flight.remove(&key);
                self.finished.insert(key);
                self.in_flight.is_empty()
            }
            _ => false,
        }
    }

    /// Returns true when no tile read is queued or running.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Cancels everything and joins the worker pool.
    pub fn stop(&mut self) {
        self.cancel_all();
        self.queue.close();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("tile read worker panicked");
            }
        }
    }

    fn enqueue_back(&mut self, key: TileKey) {
        let task = Arc::new(TileInfo::new(key, self.buildings_3d));
        self.in_flight.insert(key, Arc::clone(&task));
        self.queue.push_back(task);
    }

    fn cancel_tile(&mut self, key: &TileKey) {
        if let Some(task) = self.in_flight.remove(key) {
            task.cancel();
            // A task still queued never ran, so no completion message will
            // ever arrive for it; dequeue it entirely.
            self.queue.remove(key);
        }
        self.finished.remove(key);
    }

    fn cancel_all(&mut self) {
        let keys: Vec<TileKey> = self.in_flight.keys().copied().collect();
        for key in keys {
            self.cancel_tile(&key);
        }
        self.finished.clear();
    }
}

impl Drop for ReadManager {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
        }
    }
}

fn default_pool_size() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    // Leave a core each for the frontend and backend threads.
    cores.saturating_sub(2).max(1)
}

fn worker_loop(
    queue: Arc<TaskQueue>,
    commutator: Arc<ThreadCommutator>,
    provider: Arc<dyn MapDataProvider>,
    style: Arc<dyn StyleEngine>,
    index: Arc<MemoryFeatureIndex>,
) {
    while let Some(task) = queue.pop_blocking() {
        let mut context = EngineContext::new(task.key(), Arc::clone(&commutator));
        match task.read_features(provider.as_ref(), style.as_ref(), index.as_ref(), &mut context) {
            Ok(()) => context.flush_and_finish(),
            Err(_) => {
                log::trace!("tile read canceled: {:?}", task.key());
                context.finish_canceled();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{Message, MessageAcceptor, Priority, ThreadName};
    use crate::provider::{DrawRule, Feature};
    use crate::tile::feature_index::{FeatureId, SegmentId};
    use crate::view::ScreenState;
    use nalgebra::Point2;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<(ThreadName, Message)>>,
    }

    impl Recorder {
        fn take_finished(&self) -> Vec<TileKey> {
            let mut messages = self.messages.lock();
            let mut finished = Vec::new();
            messages.retain(|entry| match entry {
                (ThreadName::ResourceUpload, Message::FinishTileRead { key }) => {
                    finished.push(*key);
                    false
                }
                _ => true,
            });
            finished
        }

        fn flushed_tiles(&self) -> Vec<TileKey> {
            self.messages
                .lock()
                .iter()
                .filter_map(|(_, message)| match message {
                    Message::FlushTile { key, .. } => Some(*key),
                    _ => None,
                })
                .collect()
        }
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

    struct Gate {
        open: Mutex<bool>,
        opened: Condvar,
        entered: AtomicUsize,
    }

    impl Gate {
        fn new(open: bool) -> Arc<Self> {
            Arc::new(Self {
                open: Mutex::new(open),
                opened: Condvar::new(),
                entered: AtomicUsize::new(0),
            })
        }

        fn open(&self) {
            *self.open.lock() = true;
            self.opened.notify_all();
        }

        fn pass(&self) {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
        }
    }

    struct GatedProvider {
        gate: Arc<Gate>,
        reads: AtomicU32,
    }

    impl MapDataProvider for GatedProvider {
        fn read_feature_ids(&self, _rect: &Rect, _zoom: u8) -> Vec<FeatureId> {
            self.gate.pass();
            let read = self.reads.fetch_add(1, Ordering::SeqCst);
            vec![FeatureId::new(SegmentId(0), read)]
        }

        fn read_features(&self, ids: &[FeatureId]) -> Vec<Feature> {
            ids.iter()
                .map(|id| Feature {
                    id: *id,
                    points: vec![Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)],
                    rank: 0,
                    label: None,
                })
                .collect()
        }
    }

    struct OrderingProvider {
        gate: Arc<Gate>,
        read_order: Mutex<Vec<f64>>,
    }

    impl MapDataProvider for OrderingProvider {
        fn read_feature_ids(&self, rect: &Rect, _zoom: u8) -> Vec<FeatureId> {
            self.gate.pass();
            self.read_order.lock().push(rect.x_min);
            vec![]
        }

        fn read_features(&self, _ids: &[FeatureId]) -> Vec<Feature> {
            vec![]
        }
    }

    struct LineStyle;

    impl StyleEngine for LineStyle {
        fn draw_rules(&self, _feature: &Feature, _zoom: u8) -> Vec<DrawRule> {
            vec![DrawRule::Line {
                width: 1.0,
                depth: 0,
            }]
        }
    }

    fn wire() -> (Arc<ThreadCommutator>, Arc<Recorder>) {
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

    fn request(keys: &[TileKey]) -> TileRequest {
        TileRequest {
            tiles: keys.iter().copied().collect(),
            screen: ScreenState::default(),
            buildings_3d: false,
            force_refresh: false,
        }
    }

    fn drive_to_idle(manager: &mut ReadManager, recorder: &Recorder) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !manager.is_idle() {
            for key in recorder.take_finished() {
                manager.tile_finished(key);
            }
            assert!(Instant::now() < deadline, "read pipeline never went idle");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn warm_update_reads_only_the_incoming_tiles() {
        let (commutator, recorder) = wire();
        let gate = Gate::new(true);
        let provider = Arc::new(GatedProvider {
            gate,
            reads: AtomicU32::new(0),
        });
        let mut manager = ReadManager::new(
            commutator,
            provider.clone(),
            Arc::new(LineStyle),
            Arc::new(MemoryFeatureIndex::new()),
            Some(2),
        )
        .expect("worker pool");

        let a = TileKey::new(0, 0, 5).with_generation(1, 0);
        let b = TileKey::new(1, 0, 5).with_generation(1, 0);
        let c = TileKey::new(2, 0, 5).with_generation(1, 0);
        let d = TileKey::new(3, 0, 5).with_generation(1, 0);

        manager.update_coverage(request(&[a, b, c]));
        drive_to_idle(&mut manager, &recorder);
        assert_eq!(provider.reads.load(Ordering::SeqCst), 3);

        // The camera panned one tile: only the newly visible tile is read.
        manager.update_coverage(request(&[b, c, d]));
        drive_to_idle(&mut manager, &recorder);
        assert_eq!(provider.reads.load(Ordering::SeqCst), 4);
        assert_eq!(recorder.flushed_tiles().len(), 4);
    }

    #[test]
    fn warm_update_requeues_still_wanted_tiles_at_the_front_in_order() {
        let (commutator, recorder) = wire();
        let gate = Gate::new(false);
        let provider = Arc::new(OrderingProvider {
            gate: Arc::clone(&gate),
            read_order: Mutex::new(Vec::new()),
        });
        let mut manager = ReadManager::new(
            commutator,
            Arc::clone(&provider) as Arc<dyn MapDataProvider>,
            Arc::new(LineStyle),
            Arc::new(MemoryFeatureIndex::new()),
            Some(1),
        )
        .expect("worker pool");

        let h = TileKey::new(0, 0, 5).with_generation(1, 0);
        let a = TileKey::new(1, 0, 5).with_generation(1, 0);
        let b = TileKey::new(2, 0, 5).with_generation(1, 0);
        let c = TileKey::new(3, 0, 5).with_generation(1, 0);
        let d = TileKey::new(4, 0, 5).with_generation(1, 0);

        manager.update_coverage(request(&[h, a, b, c]));
        // The single worker starts on h and blocks on the gate, so a, b and c
        // are still queued when the coverage changes.
        let deadline = Instant::now() + Duration::from_secs(5);
        while gate.entered.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "worker never started");
            std::thread::sleep(Duration::from_millis(2));
        }

        // The camera panned one tile: a drops out, the still-wanted b and c
        // must be read before the newly visible d.
        manager.update_coverage(request(&[h, b, c, d]));
        gate.open();
        drive_to_idle(&mut manager, &recorder);

        let expected: Vec<f64> = [h, b, c, d]
            .iter()
            .map(|key| key.map_rect().x_min)
            .collect();
        assert_eq!(*provider.read_order.lock(), expected);
        manager.stop();
    }

    #[test]
    fn outdated_tile_is_canceled_and_produces_no_geometry() {
        let (commutator, recorder) = wire();
        let gate = Gate::new(false);
        let provider = Arc::new(GatedProvider {
            gate: Arc::clone(&gate),
            reads: AtomicU32::new(0),
        });
        let mut manager = ReadManager::new(
            commutator,
            provider,
            Arc::new(LineStyle),
            Arc::new(MemoryFeatureIndex::new()),
            Some(1),
        )
        .expect("worker pool");

        let a = TileKey::new(0, 0, 5).with_generation(1, 0);
        let b = TileKey::new(9, 9, 5).with_generation(2, 0);

        manager.update_coverage(request(&[a]));
        // Wait for the single worker to start reading tile a.
        let deadline = Instant::now() + Duration::from_secs(5);
        while gate.entered.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "worker never started");
            std::thread::sleep(Duration::from_millis(2));
        }

        // Disjoint coverage: the running read of a is canceled mid-flight.
        manager.update_coverage(request(&[b]));
        gate.open();
        drive_to_idle(&mut manager, &recorder);

        let flushed = recorder.flushed_tiles();
        assert!(
            flushed.iter().all(|key| key.strict_eq(&b)),
            "geometry leaked from canceled tile: {flushed:?}"
        );
        manager.stop();
    }

    #[test]
    fn invalidate_rereads_intersecting_finished_tiles() {
        let (commutator, recorder) = wire();
        let gate = Gate::new(true);
        let provider = Arc::new(GatedProvider {
            gate,
            reads: AtomicU32::new(0),
        });
        let mut manager = ReadManager::new(
            commutator,
            provider.clone(),
            Arc::new(LineStyle),
            Arc::new(MemoryFeatureIndex::new()),
            Some(1),
        )
        .expect("worker pool");

        let a = TileKey::new(0, 0, 3).with_generation(1, 0);
        let b = TileKey::new(5, 5, 3).with_generation(1, 0);
        manager.update_coverage(request(&[a, b]));
        drive_to_idle(&mut manager, &recorder);
        assert_eq!(provider.reads.load(Ordering::SeqCst), 2);

        manager.invalidate(a.map_rect());
        drive_to_idle(&mut manager, &recorder);
        assert_eq!(provider.reads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn completion_of_superseded_generation_is_ignored() {
        let (commutator, _recorder) = wire();
        let gate = Gate::new(false);
        let provider = Arc::new(GatedProvider {
            gate: Arc::clone(&gate),
            reads: AtomicU32::new(0),
        });
        let mut manager = ReadManager::new(
            commutator,
            provider,
            Arc::new(LineStyle),
            Arc::new(MemoryFeatureIndex::new()),
            Some(1),
        )
        .expect("worker pool");

        let old = TileKey::new(0, 0, 4).with_generation(1, 0);
        manager.update_coverage(request(&[old]));

        // A stale completion with a different generation must not retire the
        // current task.
        let stale = TileKey::new(0, 0, 4).with_generation(7, 0);
        assert!(!manager.tile_finished(stale));
        assert!(!manager.is_idle());

        gate.open();
        manager.stop();
    }
}
