//! Routing of inbound packets to the handlers collaborators registered
//! for their message-type ranges.

use std::sync::{Arc, Mutex};

use crate::{Error, Result};

/// A collaborator consuming the messages of a type range, an
/// authentication or connection layer typically.
///
/// `None` is the terminal goodbye delivered exactly once when the
/// transport closes.
pub trait MessageHandler: Send + Sync {
    /// Process one inbound payload, or the terminal `None`.
    fn handle(&self, payload: Option<&[u8]>) -> Result<()>;
}

struct Entry {
    handler: Arc<dyn MessageHandler>,
    low: u8,
    high: u8,
}

#[derive(Default)]
struct Entries {
    list: Vec<Entry>,
    terminated: bool,
}

/// The handler registry; ranges may overlap, the earliest registration
/// wins.
#[derive(Default)]
pub struct MessageRouter {
    entries: Mutex<Entries>,
}

impl MessageRouter {
    /// Append a handler covering the inclusive `low..=high` type range.
    pub fn register(&self, handler: Arc<dyn MessageHandler>, low: u8, high: u8) {
        let mut entries = self.entries.lock().expect("handler registry poisoned");

        entries.list.push(Entry { handler, low, high });
    }

    /// Remove the earliest entry matching the exact handler identity and
    /// bounds.
    pub fn unregister(&self, handler: &Arc<dyn MessageHandler>, low: u8, high: u8) {
        let mut entries = self.entries.lock().expect("handler registry poisoned");

        if let Some(at) = entries.list.iter().position(|entry| {
            Arc::ptr_eq(&entry.handler, handler) && entry.low == low && entry.high == high
        }) {
            entries.list.remove(at);
        }
    }

    /// Forward a payload to the first matching handler.
    ///
    /// The registry lock is not held across the callback, handlers are
    /// free to send.
    pub fn dispatch(&self, ty: u8, payload: &[u8]) -> Result<()> {
        let handler = {
            let entries = self.entries.lock().expect("handler registry poisoned");

            entries
                .list
                .iter()
                .find(|entry| entry.low <= ty && ty <= entry.high)
                .map(|entry| Arc::clone(&entry.handler))
        };

        match handler {
            Some(handler) => handler.handle(Some(payload)),
            None => Err(Error::UnexpectedMessage(ty)),
        }
    }

    /// Deliver the terminal goodbye to every handler, in registration
    /// order, exactly once; handler errors are swallowed.
    pub fn terminate(&self) {
        let snapshot = {
            let mut entries = self.entries.lock().expect("handler registry poisoned");

            if entries.terminated {
                return;
            }
            entries.terminated = true;

            entries
                .list
                .iter()
                .map(|entry| Arc::clone(&entry.handler))
                .collect::<Vec<_>>()
        };

        for handler in snapshot {
            let _ = handler.handle(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        live: AtomicUsize,
        goodbyes: AtomicUsize,
    }

    impl MessageHandler for Recorder {
        fn handle(&self, payload: Option<&[u8]>) -> Result<()> {
            match payload {
                Some(_) => self.live.fetch_add(1, Ordering::SeqCst),
                None => self.goodbyes.fetch_add(1, Ordering::SeqCst),
            };

            Ok(())
        }
    }

    #[test]
    fn first_registration_wins_on_overlap() {
        let router = MessageRouter::default();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());

        router.register(first.clone(), 50, 79);
        router.register(second.clone(), 60, 70);

        router.dispatch(65, &[65]).unwrap();

        assert_eq!(first.live.load(Ordering::SeqCst), 1);
        assert_eq!(second.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unregistering_uncovers_the_next_match() {
        let router = MessageRouter::default();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());

        router.register(first.clone(), 50, 79);
        router.register(second.clone(), 50, 79);

        let erased: Arc<dyn MessageHandler> = first.clone();
        router.unregister(&erased, 50, 79);
        router.dispatch(50, &[50]).unwrap();

        assert_eq!(first.live.load(Ordering::SeqCst), 0);
        assert_eq!(second.live.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn uncovered_types_are_an_error() {
        let router = MessageRouter::default();

        assert!(matches!(
            router.dispatch(80, &[80]),
            Err(Error::UnexpectedMessage(80))
        ));
    }

    #[test]
    fn termination_reaches_every_handler_once() {
        let router = MessageRouter::default();
        let handler = Arc::new(Recorder::default());

        router.register(handler.clone(), 50, 79);
        router.register(handler.clone(), 80, 100);

        router.terminate();
        router.terminate();

        assert_eq!(handler.goodbyes.load(Ordering::SeqCst), 2);
    }
}
