//! Long-lived renderer threads and their graphics context lifecycle.
//!
//! Both engine threads (frontend render and backend resource upload) run the
//! same harness: a loop that applies enable/disable transitions requested by
//! the application thread, then hands control to the thread's delegate for
//! one frame. Rendering can be turned off and on many times per process
//! lifetime (surface loss on mobile); context-dependent messages are held
//! back by the queue filter while no context exists.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::MercatorError;
use crate::messaging::{MessageAcceptor, MessageQueue, Priority};
use crate::provider::{GraphicsContext, GraphicsContextFactory};

/// How long the application thread waits for a renderer thread to
/// acknowledge an enable/disable request.
const TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-thread rendering logic driven by the lifecycle harness.
pub trait RendererDelegate: Send {
    /// Runs one iteration of the thread's loop with rendering enabled. The
    /// implementation must pop from the queue with a bounded timeout so the
    /// harness regains control promptly.
    fn frame(&mut self, queue: &MessageQueue);

    /// A graphics context became available. The delegate owns it until
    /// [`on_context_destroy`](Self::on_context_destroy).
    fn on_context_create(&mut self, context: Box<dyn GraphicsContext>);

    /// The graphics context is about to be lost. The delegate must drop the
    /// context and everything derived from it.
    fn on_context_destroy(&mut self);

    /// Rendering was disabled. Called after the context is destroyed.
    fn on_rendering_disabled(&mut self) {}

    /// The thread is shutting down for good. Called after the queue is
    /// drained.
    fn release_resources(&mut self);
}

/// Which context the thread acquires from the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Frame drawing context for the render thread.
    Draw,
    /// Resource upload context for the backend thread.
    Upload,
}

/// How a lifecycle request ended, as observed by its blocker.
enum TransitionAck {
    /// The renderer thread applied (or absorbed) the transition.
    Applied,
    /// The request was discarded before the thread could apply it.
    Discarded,
    /// The renderer thread never answered.
    TimedOut,
}

/// One-shot rendezvous between the requesting thread and a renderer thread.
pub struct Blocker {
    outcome: Mutex<Option<bool>>,
    signaled: Condvar,
}

impl Blocker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(None),
            signaled: Condvar::new(),
        })
    }

    fn signal(&self, applied: bool) {
        *self.outcome.lock() = Some(applied);
        self.signaled.notify_all();
    }

    fn wait(&self, timeout: Duration) -> TransitionAck {
        let mut outcome = self.outcome.lock();
        while outcome.is_none() {
            if self.signaled.wait_for(&mut outcome, timeout).timed_out() {
                break;
            }
        }
        match *outcome {
            Some(true) => TransitionAck::Applied,
            Some(false) => TransitionAck::Discarded,
            None => TransitionAck::TimedOut,
        }
    }
}

struct PendingTransition {
    enable: bool,
    blocker: Arc<Blocker>,
}

#[derive(Default)]
struct ControlState {
    pending: Option<PendingTransition>,
}

#[derive(Default)]
struct ThreadControl {
    state: Mutex<ControlState>,
    changed: Condvar,
}

/// Counters observable from outside the thread, for tests and diagnostics.
#[derive(Default)]
pub struct LifecycleHooks {
    contexts_created: AtomicUsize,
    contexts_destroyed: AtomicUsize,
    resources_released: AtomicBool,
}

impl LifecycleHooks {
    /// Number of graphics contexts created so far.
    pub fn contexts_created(&self) -> usize {
        self.contexts_created.load(Ordering::SeqCst)
    }

    /// Number of graphics contexts destroyed so far.
    pub fn contexts_destroyed(&self) -> usize {
        self.contexts_destroyed.load(Ordering::SeqCst)
    }

    /// True once the thread has released its resources and exited its loop.
    pub fn resources_released(&self) -> bool {
        self.resources_released.load(Ordering::SeqCst)
    }
}

/// A renderer thread: message queue, lifecycle control and the join handle.
pub struct RendererThread {
    queue: Arc<MessageQueue>,
    control: Arc<ThreadControl>,
    cancel: Arc<AtomicBool>,
    hooks: Arc<LifecycleHooks>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl RendererThread {
    /// Spawns the thread with rendering initially disabled. The first
    /// [`set_rendering_enabled(true)`](Self::set_rendering_enabled) creates
    /// the graphics context.
    pub fn spawn(
        name: &str,
        kind: ContextKind,
        factory: Arc<dyn GraphicsContextFactory>,
        delegate: impl RendererDelegate + 'static,
    ) -> std::io::Result<Self> {
        let queue = Arc::new(MessageQueue::new());
        let control = Arc::new(ThreadControl::default());
        let cancel = Arc::new(AtomicBool::new(false));
        let hooks = Arc::new(LifecycleHooks::default());

        let worker = Worker {
            queue: Arc::clone(&queue),
            control: Arc::clone(&control),
            cancel: Arc::clone(&cancel),
            hooks: Arc::clone(&hooks),
            kind,
            factory,
            delegate,
        };
        let join = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || worker.run())?;

        Ok(Self {
            queue,
            control,
            cancel,
            hooks,
            join: Mutex::new(Some(join)),
        })
    }

    /// The thread's message queue.
    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    /// Observability counters of the thread.
    pub fn hooks(&self) -> &Arc<LifecycleHooks> {
        &self.hooks
    }

    /// Enables or disables rendering, blocking until the thread has applied
    /// the transition. Enabling creates a fresh graphics context; disabling
    /// destroys the current one and holds back context-dependent messages.
    ///
    /// Returns [`MercatorError::TransitionSuperseded`] when a newer request
    /// replaced this one before the thread applied it; the final state is
    /// then the newer request's.
    pub fn set_rendering_enabled(&self, enabled: bool) -> Result<(), MercatorError> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(MercatorError::NotRunning);
        }

        let blocker = Blocker::new();
        {
            let mut state = self.control.state.lock();
            // A not-yet-applied older request is superseded; release its
            // waiter with the discard outcome so it does not hang.
            if let Some(previous) = state.pending.take() {
                previous.blocker.signal(false);
            }
            state.pending = Some(PendingTransition {
                enable: enabled,
                blocker: Arc::clone(&blocker),
            });
        }
        self.control.changed.notify_all();

        match blocker.wait(TRANSITION_TIMEOUT) {
            TransitionAck::Applied => Ok(()),
            TransitionAck::Discarded => {
                if self.cancel.load(Ordering::SeqCst) {
                    Err(MercatorError::NotRunning)
                } else {
                    Err(MercatorError::TransitionSuperseded)
                }
            }
            TransitionAck::TimedOut => Err(MercatorError::Generic(
                "renderer thread did not acknowledge a lifecycle transition".into(),
            )),
        }
    }

    /// Requests the thread to stop and joins it. Pending messages are
    /// drained, resources released.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.control.changed.notify_all();
        self.queue.close();

        if let Some(join) = self.join.lock().take() {
            if join.join().is_err() {
                log::error!("renderer thread panicked during shutdown");
            }
        }
    }
}

impl MessageAcceptor for RendererThread {
    fn can_receive(&self) -> bool {
        !self.cancel.load(Ordering::SeqCst) && !self.queue.is_closed()
    }

    fn accept(&self, priority: Priority, message: crate::messaging::Message) {
        self.queue.post(priority, message);
    }
}

impl Drop for RendererThread {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker<D> {
    queue: Arc<MessageQueue>,
    control: Arc<ThreadControl>,
    cancel: Arc<AtomicBool>,
    hooks: Arc<LifecycleHooks>,
    kind: ContextKind,
    factory: Arc<dyn GraphicsContextFactory>,
    delegate: D,
}

impl<D: RendererDelegate> Worker<D> {
    fn run(mut self) {
        let mut enabled = false;

        while !self.cancel.load(Ordering::SeqCst) {
            let transition = self.control.state.lock().pending.take();
            if let Some(transition) = transition {
                if transition.enable != enabled {
                    if transition.enable {
                        self.enable_rendering();
                    } else {
                        self.disable_rendering();
                    }
                    enabled = transition.enable;
                }
                transition.blocker.signal(true);
                continue;
            }

            if enabled {
                self.delegate.frame(&self.queue);
            } else {
                // Nothing to draw; sleep until a transition or cancellation.
                let mut state = self.control.state.lock();
                if state.pending.is_none() && !self.cancel.load(Ordering::SeqCst) {
                    self.control
                        .changed
                        .wait_for(&mut state, Duration::from_millis(100));
                }
            }
        }

        if enabled {
            self.delegate.on_context_destroy();
            self.hooks.contexts_destroyed.fetch_add(1, Ordering::SeqCst);
        }

        self.queue.close();
        let dropped = self.queue.drain();
        if !dropped.is_empty() {
            log::debug!("dropped {} messages at renderer shutdown", dropped.len());
        }
        self.delegate.release_resources();
        self.hooks.resources_released.store(true, Ordering::SeqCst);

        // A transition may have been requested after the loop observed
        // cancellation; its waiter must not hang.
        if let Some(transition) = self.control.state.lock().pending.take() {
            transition.blocker.signal(false);
        }
    }

    fn enable_rendering(&mut self) {
        let mut context = match self.kind {
            ContextKind::Draw => self.factory.draw_context(),
            ContextKind::Upload => self.factory.upload_context(),
        };
        context.make_current();
        context.set_rendering_enabled(true);
        self.delegate.on_context_create(context);
        self.hooks.contexts_created.fetch_add(1, Ordering::SeqCst);
        self.queue.remove_filter();
        log::debug!("rendering enabled ({:?} context)", self.kind);
    }

    fn disable_rendering(&mut self) {
        // Context-dependent messages posted during the blackout must survive
        // until the next context exists.
        self.queue
            .set_filter(Box::new(|message| message.is_graphics_context_dependent()));
        self.delegate.on_context_destroy();
        self.hooks.contexts_destroyed.fetch_add(1, Ordering::SeqCst);
        self.delegate.on_rendering_disabled();
        log::debug!("rendering disabled ({:?} context)", self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{Message, PopOutcome};
    use std::sync::atomic::AtomicUsize;

    struct TestContext;

    impl GraphicsContext for TestContext {
        fn make_current(&mut self) {}
        fn flush(&mut self) {}
    }

    struct TestFactory;

    impl GraphicsContextFactory for TestFactory {
        fn draw_context(&self) -> Box<dyn GraphicsContext> {
            Box::new(TestContext)
        }

        fn upload_context(&self) -> Box<dyn GraphicsContext> {
            Box::new(TestContext)
        }
    }

    #[derive(Default)]
    struct Counters {
        frames: AtomicUsize,
        messages: AtomicUsize,
        released: AtomicBool,
    }

    struct CountingDelegate {
        counters: Arc<Counters>,
        context: Option<Box<dyn GraphicsContext>>,
    }

    impl RendererDelegate for CountingDelegate {
        fn frame(&mut self, queue: &MessageQueue) {
            self.counters.frames.fetch_add(1, Ordering::SeqCst);
            if let PopOutcome::Message(_) = queue.pop_blocking(Some(Duration::from_millis(5))) {
                self.counters.messages.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_context_create(&mut self, context: Box<dyn GraphicsContext>) {
            self.context = Some(context);
        }

        fn on_context_destroy(&mut self) {
            self.context = None;
        }

        fn release_resources(&mut self) {
            self.counters.released.store(true, Ordering::SeqCst);
        }
    }

    fn spawn_counting() -> (RendererThread, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let thread = RendererThread::spawn(
            "test-render",
            ContextKind::Draw,
            Arc::new(TestFactory),
            CountingDelegate {
                counters: Arc::clone(&counters),
                context: None,
            },
        )
        .unwrap();
        (thread, counters)
    }

    #[test]
    fn enable_disable_cycles_create_and_destroy_contexts() {
        let (thread, _counters) = spawn_counting();

        thread.set_rendering_enabled(true).unwrap();
        assert_eq!(thread.hooks().contexts_created(), 1);

        thread.set_rendering_enabled(false).unwrap();
        assert_eq!(thread.hooks().contexts_destroyed(), 1);

        thread.set_rendering_enabled(true).unwrap();
        assert_eq!(thread.hooks().contexts_created(), 2);

        thread.stop();
        // The live context from the second enable is destroyed on shutdown.
        assert_eq!(thread.hooks().contexts_destroyed(), 2);
        assert!(thread.hooks().resources_released());
    }

    #[test]
    fn frames_run_only_while_enabled() {
        let (thread, counters) = spawn_counting();

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(counters.frames.load(Ordering::SeqCst), 0);

        thread.set_rendering_enabled(true).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(counters.frames.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn messages_posted_while_disabled_arrive_after_enable() {
        let (thread, counters) = spawn_counting();

        thread.set_rendering_enabled(true).unwrap();
        thread.set_rendering_enabled(false).unwrap();

        thread.queue().post(
            Priority::Normal,
            Message::FlushOverlays {
                key: crate::tile::TileKey::new(0, 0, 1),
                handles: vec![],
            },
        );
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(counters.messages.load(Ordering::SeqCst), 0);

        thread.set_rendering_enabled(true).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while counters.messages.load(Ordering::SeqCst) == 0 {
            assert!(
                std::time::Instant::now() < deadline,
                "held-back message never delivered"
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[derive(Default)]
    struct FrameGateState {
        in_frame: bool,
        released: bool,
    }

    #[derive(Default)]
    struct FrameGate {
        state: Mutex<FrameGateState>,
        changed: Condvar,
    }

    struct GatedDelegate {
        gate: Arc<FrameGate>,
        context: Option<Box<dyn GraphicsContext>>,
    }

    impl RendererDelegate for GatedDelegate {
        fn frame(&mut self, _queue: &MessageQueue) {
            let mut state = self.gate.state.lock();
            state.in_frame = true;
            self.gate.changed.notify_all();
            while !state.released {
                self.gate.changed.wait(&mut state);
            }
        }

        fn on_context_create(&mut self, context: Box<dyn GraphicsContext>) {
            self.context = Some(context);
        }

        fn on_context_destroy(&mut self) {
            self.context = None;
        }

        fn release_resources(&mut self) {}
    }

    #[test]
    fn superseded_transition_is_reported_to_its_caller() {
        let gate = Arc::new(FrameGate::default());
        let thread = Arc::new(
            RendererThread::spawn(
                "test-render",
                ContextKind::Draw,
                Arc::new(TestFactory),
                GatedDelegate {
                    gate: Arc::clone(&gate),
                    context: None,
                },
            )
            .unwrap(),
        );

        thread.set_rendering_enabled(true).unwrap();

        // Wait for the worker to block inside a frame, where it cannot pick
        // up the next request.
        {
            let mut state = gate.state.lock();
            while !state.in_frame {
                gate.changed.wait(&mut state);
            }
        }

        let disable = {
            let thread = Arc::clone(&thread);
            std::thread::spawn(move || thread.set_rendering_enabled(false))
        };
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while thread.control.state.lock().pending.is_none() {
            assert!(
                std::time::Instant::now() < deadline,
                "disable request never queued"
            );
            std::thread::sleep(Duration::from_millis(2));
        }

        // The newer request replaces the queued disable; the replaced caller
        // must not receive a plain acknowledgment.
        let enable = {
            let thread = Arc::clone(&thread);
            std::thread::spawn(move || thread.set_rendering_enabled(true))
        };
        assert!(matches!(
            disable.join().unwrap(),
            Err(MercatorError::TransitionSuperseded)
        ));

        {
            let mut state = gate.state.lock();
            state.released = true;
            gate.changed.notify_all();
        }
        enable.join().unwrap().unwrap();

        // The superseded disable was never applied.
        assert_eq!(thread.hooks().contexts_destroyed(), 0);
        thread.stop();
    }

    #[test]
    fn set_rendering_enabled_after_stop_fails() {
        let (thread, _counters) = spawn_counting();
        thread.stop();
        assert!(matches!(
            thread.set_rendering_enabled(true),
            Err(MercatorError::NotRunning)
        ));
    }
}
