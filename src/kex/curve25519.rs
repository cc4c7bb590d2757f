//! The built-in client-side `curve25519-sha256` engine.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Condvar, Mutex,
};

use rand::RngCore;
use sha2::{Digest, Sha256};
use signature::Verifier;
use ssh_key::Signature;

use crate::{
    algorithm::{self, Cipher, Compress, Hmac, Kex},
    banner::Banners,
    codec::NewKeys,
    config::{CryptoWishList, DhGexParameters, ServerHostKeyVerifier},
    msg::{self, EcdhInit, EcdhReply, KexInit},
    wire::{to_mpint, Writer},
    Error, Result,
};

use super::{ConnectionInfo, KexEngine, KexLink, Keys};

/// Client-side strict-kex token (CVE-2023-48795 countermeasure).
const STRICT_CLIENT: &str = "kex-strict-c-v00@openssh.com";

/// Server-side strict-kex token.
const STRICT_SERVER: &str = "kex-strict-s-v00@openssh.com";

/// RFC 8308 announcement that we accept `SSH_MSG_EXT_INFO`.
const EXT_INFO_CLIENT: &str = "ext-info-c";

#[derive(Debug, Default, PartialEq)]
enum Phase {
    /// No exchange running.
    #[default]
    Idle,

    /// Our `KEXINIT` is out, the peer's has not arrived.
    AwaitingPeerInit,

    /// `ECDH_INIT` is out.
    AwaitingReply,

    /// Our `NEWKEYS` is out, the peer's has not arrived.
    AwaitingNewKeys,
}

struct Negociated {
    kex: Kex,
    host_key_name: String,
    cipher_c2s: Cipher,
    cipher_s2c: Cipher,
    mac_c2s: Hmac,
    mac_s2c: Hmac,
    comp_c2s: Compress,
    comp_s2c: Compress,
    ephemeral: Option<x25519_dalek::EphemeralSecret>,
    q_c: [u8; 32],
}

struct Pending {
    recv: NewKeys,
    info: ConnectionInfo,
}

#[derive(Default)]
struct State {
    wishlist: Option<CryptoWishList>,
    phase: Phase,

    /// Our raw `I_C` payload, a mandatory hash input.
    ours: Option<Vec<u8>>,

    /// The peer's parsed `KEXINIT` and raw `I_S` payload.
    theirs: Option<(KexInit, Vec<u8>)>,

    negociated: Option<Negociated>,
    pending: Option<Pending>,

    session_id: Option<Vec<u8>>,
    exchanges: usize,
    latest: Option<ConnectionInfo>,

    closed: bool,
}

/// The built-in [`KexEngine`]: `curve25519-sha256` on the client side of
/// the exchange.
pub struct ClientKex {
    link: Arc<dyn KexLink>,
    banners: Banners,
    host: String,
    port: u16,
    verifier: Option<Arc<dyn ServerHostKeyVerifier>>,

    strict: AtomicBool,
    state: Mutex<State>,
    completed: Condvar,
}

impl ClientKex {
    /// Build an engine around the transport-provided [`KexLink`].
    pub fn new(
        link: Arc<dyn KexLink>,
        banners: Banners,
        host: impl Into<String>,
        port: u16,
        verifier: Option<Arc<dyn ServerHostKeyVerifier>>,
    ) -> Self {
        Self {
            link,
            banners,
            host: host.into(),
            port,
            verifier,
            strict: AtomicBool::new(false),
            state: Mutex::new(State::default()),
            completed: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("kex state poisoned")
    }

    /// Build our `KEXINIT`; the RFC 8308 and strict-kex pseudo-algorithms
    /// are only meaningful in the first exchange of a connection.
    fn client_kexinit(wishlist: &CryptoWishList, first: bool) -> KexInit {
        let mut cookie = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut cookie);

        let mut kexs = wishlist.kex_names();
        if first {
            kexs.0.push(EXT_INFO_CLIENT.to_owned());
            kexs.0.push(STRICT_CLIENT.to_owned());
        }

        KexInit {
            cookie,
            kex_algorithms: kexs,
            server_host_key_algorithms: wishlist.host_key_names(),
            encryption_algorithms_client_to_server: wishlist.cipher_names(),
            encryption_algorithms_server_to_client: wishlist.cipher_names(),
            mac_algorithms_client_to_server: wishlist.mac_names(),
            mac_algorithms_server_to_client: wishlist.mac_names(),
            compression_algorithms_client_to_server: wishlist.compression_names(),
            compression_algorithms_server_to_client: wishlist.compression_names(),
            ..Default::default()
        }
    }

    /// Emit our `KEXINIT` and leave `Idle`.
    fn begin(&self, state: &mut State) -> Result<()> {
        let wishlist = state.wishlist.as_ref().ok_or(Error::KexProtocol(
            "an exchange cannot start before `initiate`",
        ))?;

        let payload = Self::client_kexinit(wishlist, state.session_id.is_none()).encode();
        state.ours = Some(payload.clone());
        state.phase = Phase::AwaitingPeerInit;

        tracing::debug!("Starting key-exchange procedure");

        self.link.send_kex(&payload)
    }

    /// Both `KEXINIT`s are in: negociate and emit `ECDH_INIT`.
    fn negociate(&self, state: &mut State) -> Result<()> {
        let wishlist = state
            .wishlist
            .as_ref()
            .ok_or(Error::KexProtocol("negociation without a wishlist"))?;
        let (theirs, _) = state
            .theirs
            .as_ref()
            .ok_or(Error::KexProtocol("negociation without the peer's kexinit"))?;

        if state.session_id.is_none() && theirs.kex_algorithms.contains(STRICT_SERVER) {
            tracing::debug!("Both sides advertised strict-kex");
            self.strict.store(true, Ordering::SeqCst);
        }

        let kex: Kex =
            algorithm::preferred(&wishlist.kex_names(), &theirs.kex_algorithms, || {
                Error::NoCommonKex
            })?;
        let host_key_name = wishlist
            .host_key_names()
            .preferred_in(&theirs.server_host_key_algorithms)
            .ok_or(Error::NoCommonKey)?
            .to_owned();

        let negociated = Negociated {
            kex,
            host_key_name,
            cipher_c2s: algorithm::preferred(
                &wishlist.cipher_names(),
                &theirs.encryption_algorithms_client_to_server,
                || Error::NoCommonCipher,
            )?,
            cipher_s2c: algorithm::preferred(
                &wishlist.cipher_names(),
                &theirs.encryption_algorithms_server_to_client,
                || Error::NoCommonCipher,
            )?,
            mac_c2s: algorithm::preferred(
                &wishlist.mac_names(),
                &theirs.mac_algorithms_client_to_server,
                || Error::NoCommonHmac,
            )?,
            mac_s2c: algorithm::preferred(
                &wishlist.mac_names(),
                &theirs.mac_algorithms_server_to_client,
                || Error::NoCommonHmac,
            )?,
            comp_c2s: algorithm::preferred(
                &wishlist.compression_names(),
                &theirs.compression_algorithms_client_to_server,
                || Error::NoCommonCompression,
            )?,
            comp_s2c: algorithm::preferred(
                &wishlist.compression_names(),
                &theirs.compression_algorithms_server_to_client,
                || Error::NoCommonCompression,
            )?,
            ephemeral: None,
            q_c: [0; 32],
        };

        let ephemeral = x25519_dalek::EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = x25519_dalek::PublicKey::from(&ephemeral);

        let negociated = Negociated {
            ephemeral: Some(ephemeral),
            q_c: public.to_bytes(),
            ..negociated
        };
        let init = EcdhInit {
            q_c: negociated.q_c.to_vec(),
        };
        state.negociated = Some(negociated);
        state.phase = Phase::AwaitingReply;

        self.link.send_kex(&init.encode())
    }

    /// The server answered: run the ECDH, verify the host key and its
    /// signature over the exchange hash, derive and install our keys.
    fn exchange(&self, state: &mut State, reply: EcdhReply) -> Result<()> {
        let negociated = state
            .negociated
            .as_mut()
            .ok_or(Error::KexProtocol("reply without a negociation"))?;
        let ephemeral = negociated
            .ephemeral
            .take()
            .ok_or(Error::KexProtocol("reply processed twice"))?;

        let q_s = <[u8; 32]>::try_from(&reply.q_s[..])
            .map_err(|_| Error::KexProtocol("server ephemeral key of unexpected size"))?;
        let secret = ephemeral.diffie_hellman(&x25519_dalek::PublicKey::from(q_s));
        let k = to_mpint(secret.as_bytes());

        let (_, i_s) = state
            .theirs
            .as_ref()
            .ok_or(Error::KexProtocol("reply without the peer's kexinit"))?;
        let i_c = state
            .ours
            .as_ref()
            .ok_or(Error::KexProtocol("reply without our kexinit"))?;

        let mut exchange = Writer::new();
        exchange
            .string(self.banners.local.as_bytes())
            .string(self.banners.peer.as_bytes())
            .string(i_c)
            .string(i_s)
            .string(&reply.k_s)
            .string(&negociated.q_c)
            .string(&reply.q_s)
            .string(&k);
        let hash = Sha256::digest(exchange.into_bytes()).to_vec();

        if let Some(verifier) = &self.verifier {
            if !verifier.verify(&self.host, self.port, &negociated.host_key_name, &reply.k_s)? {
                return Err(Error::HostKeyRejected);
            }
        }

        let public = ssh_key::PublicKey::from_bytes(&reply.k_s)?;
        Verifier::verify(&public, &hash, &Signature::try_from(&reply.signature[..])?)?;

        let session_id = state
            .session_id
            .get_or_insert_with(|| hash.clone())
            .clone();

        let tx = Keys::client_to_server::<Sha256>(
            &k,
            &hash,
            &session_id,
            &negociated.cipher_c2s,
            &negociated.mac_c2s,
        );
        let rx = Keys::server_to_client::<Sha256>(
            &k,
            &hash,
            &session_id,
            &negociated.cipher_s2c,
            &negociated.mac_s2c,
        );

        let send = NewKeys {
            cipher: negociated.cipher_c2s.encryptor(tx.key(), tx.iv())?,
            mac: negociated.mac_c2s.keyed(tx.mac()),
            compressor: negociated.comp_c2s.compressor(),
        };
        let recv = NewKeys {
            cipher: negociated.cipher_s2c.decryptor(rx.key(), rx.iv())?,
            mac: negociated.mac_s2c.keyed(rx.mac()),
            compressor: negociated.comp_s2c.compressor(),
        };

        let info = ConnectionInfo {
            kex_algorithm: negociated.kex.as_ref().to_owned(),
            host_key_algorithm: negociated.host_key_name.clone(),
            client_to_server_cipher: negociated.cipher_c2s.as_ref().to_owned(),
            server_to_client_cipher: negociated.cipher_s2c.as_ref().to_owned(),
            client_to_server_mac: negociated.mac_c2s.as_ref().to_owned(),
            server_to_client_mac: negociated.mac_s2c.as_ref().to_owned(),
            client_to_server_compression: negociated.comp_c2s.as_ref().to_owned(),
            server_to_client_compression: negociated.comp_s2c.as_ref().to_owned(),
            server_host_key: reply.k_s.clone(),
        };

        state.pending = Some(Pending { recv, info });
        state.phase = Phase::AwaitingNewKeys;

        self.link.send_kex(&msg::newkeys())?;
        self.link.install_send(send, self.is_strict())
    }

    /// The peer's `NEWKEYS` seals the exchange.
    fn conclude(&self, state: &mut State) -> Result<()> {
        let Pending { recv, info } = state
            .pending
            .take()
            .ok_or(Error::KexProtocol("NEWKEYS before the exchange concluded"))?;

        self.link.install_recv(recv, self.is_strict())?;

        state.exchanges += 1;
        state.latest = Some(info);
        state.phase = Phase::Idle;
        state.ours = None;
        state.theirs = None;
        state.negociated = None;

        tracing::debug!("Key-exchange #{} complete", state.exchanges);

        self.completed.notify_all();
        self.link.kex_finished();

        Ok(())
    }
}

impl KexEngine for ClientKex {
    // The group-exchange bounds are irrelevant to a curve exchange.
    fn initiate(&self, wishlist: &CryptoWishList, _gex: &DhGexParameters) -> Result<()> {
        let mut state = self.lock();

        if state.closed {
            return Err(Error::KexAborted);
        }

        state.wishlist = Some(wishlist.clone());

        if state.phase != Phase::Idle {
            return Ok(());
        }

        self.begin(&mut state)
    }

    fn handle_message(&self, payload: Option<&[u8]>) -> Result<()> {
        let Some(payload) = payload else {
            let mut state = self.lock();

            state.closed = true;
            self.completed.notify_all();

            return Ok(());
        };

        let mut state = self.lock();
        if state.closed {
            return Err(Error::KexAborted);
        }

        match payload.first().copied() {
            Some(msg::SSH_MSG_KEXINIT) => {
                if !matches!(state.phase, Phase::Idle | Phase::AwaitingPeerInit) {
                    return Err(Error::KexProtocol("KEXINIT in the middle of an exchange"));
                }

                state.theirs = Some((KexInit::decode(payload)?, payload.to_vec()));

                // A peer-initiated re-keying: answer with our own first.
                if state.phase == Phase::Idle {
                    self.begin(&mut state)?;
                }

                self.negociate(&mut state)
            }
            Some(msg::SSH_MSG_KEX_ECDH_REPLY) if state.phase == Phase::AwaitingReply => {
                let reply = EcdhReply::decode(payload)?;

                self.exchange(&mut state, reply)
            }
            Some(msg::SSH_MSG_NEWKEYS) if state.phase == Phase::AwaitingNewKeys => {
                self.conclude(&mut state)
            }
            _ => Err(Error::KexProtocol(
                "message made no sense at this stage of the exchange",
            )),
        }
    }

    fn is_strict(&self) -> bool {
        self.strict.load(Ordering::SeqCst)
    }

    fn session_id(&self) -> Option<Vec<u8>> {
        self.lock().session_id.clone()
    }

    fn connection_info(&self, nth: usize) -> Result<ConnectionInfo> {
        let mut state = self.lock();

        loop {
            if state.exchanges >= nth {
                if let Some(info) = &state.latest {
                    return Ok(info.clone());
                }
            }

            if state.closed {
                return Err(Error::KexAborted);
            }

            state = self
                .completed
                .wait(state)
                .expect("kex state poisoned");
        }
    }
}
