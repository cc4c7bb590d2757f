//! The transport manager: one TCP connection, its dispatcher thread, the
//! send coordination and the once-only close.

use std::{
    io::BufReader,
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
    thread,
};

use crate::{
    banner::{self, Banners},
    codec::{Decoder, Encoder, NewKeys},
    config::{CryptoWishList, DhGexParameters, IpPreference, Profile},
    kex::{ClientKex, ConnectionInfo, KexEngine, KexLink},
    msg::{self, Disconnect, ExtensionInfo},
    queue::AsyncSendQueue,
    router::{MessageHandler, MessageRouter},
    Error, Result,
};

mod dispatch;

mod send;
use send::SendCoordinator;

/// An observer told exactly once when the connection dies, with the
/// first recorded cause.
pub trait ConnectionMonitor: Send + Sync {
    /// The connection is gone; `cause` is why.
    fn connection_lost(&self, cause: &Error);
}

#[derive(Default)]
struct Monitors {
    list: Vec<Arc<dyn ConnectionMonitor>>,
    notified: bool,
}

pub(crate) struct Inner {
    host: String,
    port: u16,
    wishlist: CryptoWishList,
    gex: DhGexParameters,

    /// Handle kept only to shut the socket down; all traffic goes
    /// through the codec halves.
    socket: TcpStream,
    banners: Banners,

    send: SendCoordinator,
    recv: Mutex<Decoder<TcpStream>>,

    engine: OnceLock<Box<dyn KexEngine>>,
    router: MessageRouter,
    monitors: Mutex<Monitors>,
    queue: AsyncSendQueue,
    ext_info: Mutex<Option<Arc<ExtensionInfo>>>,

    dispatcher: OnceLock<thread::ThreadId>,
    first_kex_finished: AtomicBool,
}

impl Inner {
    fn engine(&self) -> &dyn KexEngine {
        self.engine
            .get()
            .expect("the engine is installed before the dispatcher starts")
            .as_ref()
    }

    /// Shut the socket, latch the close flags and notify the monitors;
    /// every effect of this is once-only, whoever calls it first wins.
    fn shutdown(&self, cause: Arc<Error>) -> Arc<Error> {
        // Outside the semaphore, so a sender blocked in `write` wakes
        // with an I/O error instead of waiting for the lock.
        let _ = self.socket.shutdown(Shutdown::Both);

        let effective = self.send.mark_closed(cause);

        let snapshot = {
            let mut monitors = self.monitors.lock().expect("monitor list poisoned");

            if monitors.notified {
                return effective;
            }
            monitors.notified = true;

            monitors.list.clone()
        };

        tracing::debug!(
            "Transport to {}:{} closed: {effective}",
            self.host,
            self.port
        );

        for monitor in snapshot {
            monitor.connection_lost(&effective);
        }

        effective
    }

    /// Turn a fatal error into a hard close, handing back the error the
    /// failing caller reports.
    fn fail(&self, err: Error) -> Error {
        Error::Closed(self.shutdown(Arc::new(err)))
    }

    fn send(&self, payload: &[u8]) -> Result<()> {
        if self.dispatcher.get().copied() == Some(thread::current().id()) {
            return Err(Error::Reentrancy);
        }

        match self.send.send(payload) {
            Err(err) if !matches!(err, Error::Closed(_)) => Err(self.fail(err)),
            other => other,
        }
    }
}

impl KexLink for Inner {
    // No `fail` here: the engine calls this with its own lock held, and
    // monitor callbacks must never run under it. A failed KEX send
    // surfaces to the dispatcher (or the initiator), which drives the
    // close with no engine lock in the stack.
    fn send_kex(&self, payload: &[u8]) -> Result<()> {
        self.send.send_kex(payload)
    }

    fn install_send(&self, keys: NewKeys, reset_seq: bool) -> Result<()> {
        self.send.install(keys, reset_seq);

        Ok(())
    }

    fn install_recv(&self, keys: NewKeys, reset_seq: bool) -> Result<()> {
        let mut decoder = self.recv.lock().expect("receive half poisoned");

        decoder.install(keys);
        if reset_seq {
            decoder.reset_seq();
        }

        Ok(())
    }

    fn kex_finished(&self) {
        self.first_kex_finished.store(true, Ordering::SeqCst);
        self.send.kex_finished();
    }
}

fn open_socket(profile: &Profile) -> Result<TcpStream> {
    if let Some(proxy) = &profile.proxy {
        return proxy.open_connection(&profile.host, profile.port, profile.connect_timeout);
    }

    let addrs = (profile.host.as_str(), profile.port).to_socket_addrs()?;
    let addr = match profile.ip_preference {
        IpPreference::Both => addrs.into_iter().next(),
        IpPreference::V4Only => addrs.into_iter().find(|addr| addr.is_ipv4()),
        IpPreference::V6Only => addrs.into_iter().find(|addr| addr.is_ipv6()),
    }
    .ok_or_else(|| Error::Unresolved(profile.host.clone()))?;

    let socket = TcpStream::connect_timeout(&addr, profile.connect_timeout)?;
    socket.set_nodelay(true)?;

    Ok(socket)
}

/// One SSH-2 connection: owns the socket, both codec halves, the engine
/// and the dispatcher thread. Cheap to clone, every clone drives the
/// same connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    /// Connect with the built-in `curve25519-sha256` engine.
    pub fn connect(profile: &Profile) -> Result<Self> {
        let host = profile.host.clone();
        let port = profile.port;
        let verifier = profile.verifier.clone();

        Self::connect_with(profile, move |link, banners| {
            Box::new(ClientKex::new(link, banners, host, port, verifier))
        })
    }

    /// Connect with a caller-supplied engine; the factory receives the
    /// callback handle and the exchanged banners.
    pub fn connect_with(
        profile: &Profile,
        engine: impl FnOnce(Arc<dyn KexLink>, Banners) -> Box<dyn KexEngine>,
    ) -> Result<Self> {
        let socket = open_socket(profile)?;

        // Connect raced against a timeout; from here on reads block.
        socket.set_read_timeout(None)?;

        let mut reader = BufReader::new(socket.try_clone()?);
        let mut writer = socket.try_clone()?;
        let banners = banner::exchange(&mut reader, &mut writer, &profile.banner)?;

        let inner = Arc::new(Inner {
            host: profile.host.clone(),
            port: profile.port,
            wishlist: profile.wishlist.clone(),
            gex: profile.gex,
            socket,
            banners: banners.clone(),
            send: SendCoordinator::new(Encoder::new(writer)),
            recv: Mutex::new(Decoder::from_reader(reader)),
            engine: OnceLock::new(),
            router: MessageRouter::default(),
            monitors: Mutex::new(Monitors::default()),
            queue: AsyncSendQueue::default(),
            ext_info: Mutex::new(None),
            dispatcher: OnceLock::new(),
            first_kex_finished: AtomicBool::new(false),
        });

        let link: Arc<dyn KexLink> = Arc::clone(&inner) as Arc<dyn KexLink>;
        let _ = inner.engine.set(engine(link, banners));

        inner.engine().initiate(&profile.wishlist, &profile.gex)?;

        let looped = Arc::clone(&inner);
        thread::Builder::new()
            .name("hawser-dispatch".to_owned())
            .spawn(move || dispatch::run(looped))?;

        Ok(Self { inner })
    }

    /// Send one application payload, blocking while a key-exchange is
    /// running. Must not be called from the dispatcher thread.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        self.inner.send(payload)
    }

    /// Queue a payload for a background worker to send, for replies the
    /// dispatcher must emit without blocking itself.
    pub fn send_async(&self, payload: Vec<u8>) -> Result<()> {
        if let Some(cause) = self.inner.send.close_cause() {
            return Err(Error::Closed(cause));
        }

        if self.inner.queue.enqueue(payload)? {
            let worker = Arc::clone(&self.inner);
            thread::Builder::new()
                .name("hawser-async".to_owned())
                .spawn(move || {
                    while let Some(payload) = worker.queue.next() {
                        // A send error here resurfaces on the next
                        // foreground send, which drives the close.
                        if worker.send(&payload).is_err() {
                            worker.queue.abandon();
                            break;
                        }
                    }
                })?;
        }

        Ok(())
    }

    /// Start a re-keying; a no-op when an exchange is already running.
    pub fn force_key_exchange(&self) -> Result<()> {
        self.inner
            .engine()
            .initiate(&self.inner.wishlist, &self.inner.gex)
    }

    /// Block until the `nth` (1-indexed) key-exchange completes.
    pub fn connection_info(&self, nth: usize) -> Result<ConnectionInfo> {
        self.inner.engine().connection_info(nth)
    }

    /// The exchange hash of the first key-exchange.
    pub fn session_id(&self) -> Option<Vec<u8>> {
        self.inner.engine().session_id()
    }

    /// Register a handler for the inclusive `low..=high` message-type
    /// range; overlapping ranges are fine, first registration wins.
    pub fn register_handler(&self, handler: Arc<dyn MessageHandler>, low: u8, high: u8) {
        self.inner.router.register(handler, low, high);
    }

    /// Remove the earliest entry matching handler identity and bounds.
    pub fn unregister_handler(&self, handler: &Arc<dyn MessageHandler>, low: u8, high: u8) {
        self.inner.router.unregister(handler, low, high);
    }

    /// Register a close observer; on an already-closed transport it is
    /// told immediately.
    pub fn add_monitor(&self, monitor: Arc<dyn ConnectionMonitor>) {
        let late = {
            let mut monitors = self.inner.monitors.lock().expect("monitor list poisoned");

            if monitors.notified {
                true
            } else {
                monitors.list.push(Arc::clone(&monitor));
                false
            }
        };

        if late {
            if let Some(cause) = self.inner.send.close_cause() {
                monitor.connection_lost(&cause);
            }
        }
    }

    /// The most recent `SSH_MSG_EXT_INFO` table, if the peer sent one.
    pub fn extension_info(&self) -> Option<Arc<ExtensionInfo>> {
        self.inner.ext_info.lock().expect("ext-info poisoned").clone()
    }

    /// Politely close the connection: a best-effort `DISCONNECT` goes
    /// out first, then the socket is shut and observers are notified.
    pub fn close(&self, description: &str) {
        let farewell = Disconnect {
            code: msg::SSH_DISCONNECT_BY_APPLICATION,
            description: description.to_owned(),
            language: String::new(),
        };
        self.inner.send.send_farewell(&farewell.encode());

        self.inner
            .shutdown(Arc::new(Error::ByApplication(description.to_owned())));
    }

    /// Why the transport closed, if it has.
    pub fn close_cause(&self) -> Option<Arc<Error>> {
        self.inner.send.close_cause()
    }

    /// Whether the transport is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.send.is_closed()
    }

    /// An upper bound on the bytes the codec adds around a payload.
    pub fn packet_overhead_estimate(&self) -> usize {
        self.inner.send.overhead_estimate()
    }

    /// The peer's identification banner, verbatim.
    pub fn peer_banner(&self) -> &str {
        &self.inner.banners.peer
    }

    /// Our identification banner, verbatim.
    pub fn local_banner(&self) -> &str {
        &self.inner.banners.local
    }
}
