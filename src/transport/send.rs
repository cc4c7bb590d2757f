//! The connection semaphore: one mutex serializing the codec's send half,
//! the close flags and the key-exchange quiescence of RFC 4253 §7.

use std::{
    net::TcpStream,
    sync::{Arc, Condvar, Mutex, MutexGuard},
};

use crate::{
    codec::{Encoder, NewKeys},
    Error, Result,
};

struct SendHalf {
    encoder: Encoder<TcpStream>,

    /// While set, only KEX packets may leave; application senders park
    /// on the condvar.
    kex_ongoing: bool,

    closed: bool,
    cause: Option<Arc<Error>>,
}

pub(crate) struct SendCoordinator {
    half: Mutex<SendHalf>,
    released: Condvar,
}

impl SendCoordinator {
    pub(crate) fn new(encoder: Encoder<TcpStream>) -> Self {
        Self {
            half: Mutex::new(SendHalf {
                encoder,
                kex_ongoing: false,
                closed: false,
                cause: None,
            }),
            released: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SendHalf> {
        self.half.lock().expect("connection semaphore poisoned")
    }

    fn closed_error(half: &SendHalf) -> Error {
        match &half.cause {
            Some(cause) => Error::Closed(Arc::clone(cause)),
            None => Error::Closed(Arc::new(Error::ByApplication("closed".to_owned()))),
        }
    }

    /// The application-level send: parks while a key-exchange is running,
    /// re-checking the close flag on every wake.
    pub(crate) fn send(&self, payload: &[u8]) -> Result<()> {
        let mut half = self.lock();

        loop {
            if half.closed {
                return Err(Self::closed_error(&half));
            }
            if !half.kex_ongoing {
                break;
            }

            half = self
                .released
                .wait(half)
                .expect("connection semaphore poisoned");
        }

        half.encoder.send_one(payload)
    }

    /// The KEX-privileged send: raises the quiescence flag and transmits
    /// under the same critical section, which is what orders application
    /// packets strictly before the `KEXINIT` that parks them.
    pub(crate) fn send_kex(&self, payload: &[u8]) -> Result<()> {
        let mut half = self.lock();

        if half.closed {
            return Err(Self::closed_error(&half));
        }

        half.kex_ongoing = true;
        half.encoder.send_one(payload)
    }

    /// Lift the quiescence and release every parked sender.
    pub(crate) fn kex_finished(&self) {
        let mut half = self.lock();

        half.kex_ongoing = false;
        self.released.notify_all();
    }

    /// Best-effort `DISCONNECT` for a polite close; I/O errors are
    /// swallowed, the socket is going down right after.
    pub(crate) fn send_farewell(&self, payload: &[u8]) {
        let mut half = self.lock();

        if !half.closed {
            let _ = half.encoder.send_one(payload);
        }
    }

    /// Latch the close flag; the first cause wins and is returned either
    /// way. Parked senders are released.
    pub(crate) fn mark_closed(&self, cause: Arc<Error>) -> Arc<Error> {
        let mut half = self.lock();

        if !half.closed {
            half.closed = true;
            half.cause = Some(Arc::clone(&cause));
            self.released.notify_all();

            cause
        } else {
            half.cause
                .clone()
                .unwrap_or(cause)
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn close_cause(&self) -> Option<Arc<Error>> {
        self.lock().cause.clone()
    }

    /// Install freshly derived send contexts, resetting the sequence
    /// number at the same instant when strict-kex demands it.
    pub(crate) fn install(&self, keys: NewKeys, reset_seq: bool) {
        let mut half = self.lock();

        half.encoder.install(keys);
        if reset_seq {
            half.encoder.reset_seq();
        }
    }

    /// Activate delayed compression on the send half.
    pub(crate) fn start_compression(&self) {
        self.lock().encoder.start_compression();
    }

    pub(crate) fn overhead_estimate(&self) -> usize {
        self.lock().encoder.overhead_estimate()
    }
}
