//! Routing of messages between the engine threads by logical name.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Message, Priority};

/// Logical name of a message-processing thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadName {
    /// The backend thread: drives the tile read pipeline and uploads
    /// resources.
    ResourceUpload,
    /// The frontend thread: composes and draws frames.
    Render,
}

/// Receiving side of a registered thread.
pub trait MessageAcceptor: Send + Sync {
    /// Returns false once the thread no longer processes messages. The
    /// commutator drops messages addressed to it from then on.
    fn can_receive(&self) -> bool;

    /// Enqueues a message for the thread.
    fn accept(&self, priority: Priority, message: Message);
}

/// Routes messages to registered threads by [`ThreadName`]. Shared by every
/// thread of the engine, including tile-read workers.
#[derive(Default)]
pub struct ThreadCommutator {
    acceptors: RwLock<HashMap<ThreadName, Arc<dyn MessageAcceptor>>>,
}

impl ThreadCommutator {
    /// Creates a commutator with no registered threads.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a thread's acceptor under its name.
    ///
    /// # Panics
    ///
    /// Panics if the name is already registered. Thread wiring happens once
    /// at engine construction; a duplicate is a wiring bug.
    pub fn register_thread(&self, name: ThreadName, acceptor: Arc<dyn MessageAcceptor>) {
        let mut acceptors = self.acceptors.write();
        if acceptors.insert(name, acceptor).is_some() {
            panic!("thread {name:?} registered twice");
        }
    }

    /// Posts a message to the named thread. Messages to unregistered or
    /// stopped threads are silently dropped; senders do not track receiver
    /// lifetimes.
    pub fn post(&self, target: ThreadName, priority: Priority, message: Message) {
        let acceptors = self.acceptors.read();
        match acceptors.get(&target) {
            Some(acceptor) if acceptor.can_receive() => acceptor.accept(priority, message),
            _ => log::trace!("dropping message to unavailable thread {target:?}"),
        }
    }

    /// Posts a clone of the message to every registered live thread.
    pub fn post_broadcast(&self, priority: Priority, message: Message) {
        let acceptors = self.acceptors.read();
        for acceptor in acceptors.values() {
            if acceptor.can_receive() {
                acceptor.accept(priority, message.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingAcceptor {
        alive: AtomicBool,
        received: Mutex<Vec<Message>>,
    }

    impl RecordingAcceptor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                alive: AtomicBool::new(true),
                received: Mutex::new(Vec::new()),
            })
        }
    }

    impl MessageAcceptor for RecordingAcceptor {
        fn can_receive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn accept(&self, _priority: Priority, message: Message) {
            self.received.lock().push(message);
        }
    }

    #[test]
    fn routes_to_the_named_thread() {
        let commutator = ThreadCommutator::new();
        let render = RecordingAcceptor::new();
        let upload = RecordingAcceptor::new();
        commutator.register_thread(ThreadName::Render, render.clone());
        commutator.register_thread(ThreadName::ResourceUpload, upload.clone());

        commutator.post(ThreadName::Render, Priority::Normal, Message::FinishReading);

        assert_eq!(render.received.lock().len(), 1);
        assert!(upload.received.lock().is_empty());
    }

    #[test]
    fn post_to_dead_thread_is_dropped() {
        let commutator = ThreadCommutator::new();
        let render = RecordingAcceptor::new();
        commutator.register_thread(ThreadName::Render, render.clone());
        render.alive.store(false, Ordering::SeqCst);

        commutator.post(ThreadName::Render, Priority::Normal, Message::FinishReading);
        commutator.post(
            ThreadName::ResourceUpload,
            Priority::Normal,
            Message::FinishReading,
        );

        assert!(render.received.lock().is_empty());
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let commutator = ThreadCommutator::new();
        commutator.register_thread(ThreadName::Render, RecordingAcceptor::new());
        commutator.register_thread(ThreadName::Render, RecordingAcceptor::new());
    }

    #[test]
    fn broadcast_reaches_every_live_thread() {
        let commutator = ThreadCommutator::new();
        let render = RecordingAcceptor::new();
        let upload = RecordingAcceptor::new();
        commutator.register_thread(ThreadName::Render, render.clone());
        commutator.register_thread(ThreadName::ResourceUpload, upload.clone());

        commutator.post_broadcast(Priority::Normal, Message::SetBuildings3d(true));

        assert_eq!(render.received.lock().len(), 1);
        assert_eq!(upload.received.lock().len(), 1);
    }
}
