#![allow(dead_code)]

use std::{
    io::{BufRead, BufReader, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{Arc, Condvar, Mutex},
    thread,
    time::{Duration, Instant},
};

use hawser::{
    banner::Banners,
    config::{CryptoWishList, DhGexParameters, Profile},
    kex::{ConnectionInfo, KexEngine, KexLink},
    msg, ConnectionMonitor, Error, Result,
};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// Bind an ephemeral port and run `script` against the first connection.
pub fn server<F, T>(script: F) -> (SocketAddr, thread::JoinHandle<T>)
where
    F: FnOnce(Peer) -> T + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");

        script(Peer::handshake(stream))
    });

    (addr, handle)
}

pub fn profile(addr: SocketAddr) -> Profile {
    let mut profile = Profile::new(addr.ip().to_string(), addr.port());
    profile.connect_timeout = Duration::from_secs(5);

    profile
}

/// Spin until `probe` returns true, panicking after `timeout`.
pub fn poll_until(timeout: Duration, what: &str, mut probe: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;

    while !probe() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

/// The scripted far side of a connection: banner exchange on creation,
/// then cleartext binary packets.
pub struct Peer {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Peer {
    pub fn handshake(stream: TcpStream) -> Self {
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        let mut writer = stream;

        writer.write_all(b"SSH-2.0-scripted_peer\r\n").expect("banner out");

        let mut line = String::new();
        reader.read_line(&mut line).expect("banner in");
        assert!(line.starts_with("SSH-2.0-"), "unexpected banner: {line}");

        Self { reader, writer }
    }

    pub fn write_packet(&mut self, payload: &[u8]) {
        let mut padding = 8 - (5 + payload.len()) % 8;
        while padding < 4 {
            padding += 8;
        }

        let mut packet = Vec::with_capacity(5 + payload.len() + padding);
        packet.extend_from_slice(&((1 + payload.len() + padding) as u32).to_be_bytes());
        packet.push(padding as u8);
        packet.extend_from_slice(payload);
        packet.extend_from_slice(&vec![0u8; padding]);

        self.writer.write_all(&packet).expect("packet out");
    }

    pub fn read_packet(&mut self) -> Vec<u8> {
        self.try_read_packet().expect("packet in")
    }

    pub fn try_read_packet(&mut self) -> std::io::Result<Vec<u8>> {
        let mut head = [0u8; 4];
        self.reader.read_exact(&mut head)?;

        let length = u32::from_be_bytes(head) as usize;
        let mut rest = vec![0u8; length];
        self.reader.read_exact(&mut rest)?;

        let padding = rest[0] as usize;
        rest.drain(..1);
        rest.truncate(length - 1 - padding);

        Ok(rest)
    }

    /// Swallow inbound packets until the peer goes away.
    pub fn drain(&mut self) {
        while self.try_read_packet().is_ok() {}
    }
}

#[derive(Default)]
struct StubState {
    ongoing: bool,
    exchanges: usize,
    closed: bool,
}

/// A [`KexEngine`] test double: a `KEXINIT` each way and a `NEWKEYS`
/// each way complete an exchange, no cryptography anywhere.
pub struct StubKex {
    link: Arc<dyn KexLink>,
    strict: bool,
    state: Mutex<StubState>,
    completed: Condvar,
}

impl StubKex {
    pub fn factory(
        strict: bool,
    ) -> impl FnOnce(Arc<dyn KexLink>, Banners) -> Box<dyn KexEngine> {
        move |link, _| {
            Box::new(Self {
                link,
                strict,
                state: Mutex::new(StubState::default()),
                completed: Condvar::new(),
            })
        }
    }

    fn dummy_info() -> ConnectionInfo {
        ConnectionInfo {
            kex_algorithm: "stub".into(),
            host_key_algorithm: "none".into(),
            client_to_server_cipher: "none".into(),
            server_to_client_cipher: "none".into(),
            client_to_server_mac: "none".into(),
            server_to_client_mac: "none".into(),
            client_to_server_compression: "none".into(),
            server_to_client_compression: "none".into(),
            server_host_key: Vec::new(),
        }
    }
}

impl KexEngine for StubKex {
    fn initiate(&self, _: &CryptoWishList, _: &DhGexParameters) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        if state.closed {
            return Err(Error::KexAborted);
        }
        if state.ongoing {
            return Ok(());
        }
        state.ongoing = true;

        self.link.send_kex(&[msg::SSH_MSG_KEXINIT])
    }

    fn handle_message(&self, payload: Option<&[u8]>) -> Result<()> {
        let Some(payload) = payload else {
            self.state.lock().unwrap().closed = true;
            self.completed.notify_all();

            return Ok(());
        };

        match payload[0] {
            msg::SSH_MSG_KEXINIT => {
                let ongoing = {
                    let mut state = self.state.lock().unwrap();
                    std::mem::replace(&mut state.ongoing, true)
                };

                // A peer-initiated exchange: our KEXINIT goes out first.
                if !ongoing {
                    self.link.send_kex(&[msg::SSH_MSG_KEXINIT])?;
                }

                self.link.send_kex(&msg::newkeys())
            }
            msg::SSH_MSG_NEWKEYS => {
                {
                    let mut state = self.state.lock().unwrap();
                    state.ongoing = false;
                    state.exchanges += 1;
                    self.completed.notify_all();
                }

                self.link.kex_finished();

                Ok(())
            }
            _ => Err(Error::KexProtocol("the stub only understands the basics")),
        }
    }

    fn is_strict(&self) -> bool {
        self.strict
    }

    fn session_id(&self) -> Option<Vec<u8>> {
        (self.state.lock().unwrap().exchanges > 0).then(|| vec![0x5a; 32])
    }

    fn connection_info(&self, nth: usize) -> Result<ConnectionInfo> {
        let mut state = self.state.lock().unwrap();

        loop {
            if state.exchanges >= nth {
                return Ok(Self::dummy_info());
            }
            if state.closed {
                return Err(Error::KexAborted);
            }

            state = self.completed.wait(state).unwrap();
        }
    }
}

/// A monitor counting notifications and recording their causes.
#[derive(Default)]
pub struct Probe {
    pub causes: Mutex<Vec<String>>,
}

impl Probe {
    pub fn count(&self) -> usize {
        self.causes.lock().unwrap().len()
    }
}

impl ConnectionMonitor for Probe {
    fn connection_lost(&self, cause: &Error) {
        self.causes.lock().unwrap().push(cause.to_string());
    }
}
