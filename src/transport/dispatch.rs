//! The dedicated receive loop: one packet per iteration, classified by
//! its type byte, dispatched or consumed.

use std::sync::{atomic::Ordering, Arc};

use crate::{
    codec::RECV_BUFFER_SIZE,
    msg::{self, DebugMsg, Disconnect, ExtensionInfo},
    Error, Result,
};

use super::Inner;

pub(super) fn run(inner: Arc<Inner>) {
    let _ = inner.dispatcher.set(std::thread::current().id());

    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let err = loop {
        match step(&inner, &mut buf) {
            Ok(()) => continue,
            Err(err) => break err,
        }
    };

    inner.shutdown(Arc::new(err));

    // Release anyone parked on the engine, then hand every handler its
    // goodbye.
    let _ = inner.engine().handle_message(None);
    inner.router.terminate();
}

fn step(inner: &Inner, buf: &mut [u8]) -> Result<()> {
    let len = inner
        .recv
        .lock()
        .expect("receive half poisoned")
        .receive_one(buf)?;
    let payload = &buf[..len];
    let ty = payload[0];

    // CVE-2023-48795: under strict-kex nothing but the KEX set may
    // arrive before the first exchange finishes, IGNORE and DEBUG
    // included.
    if !inner.first_kex_finished.load(Ordering::SeqCst)
        && inner.engine().is_strict()
        && !msg::is_kex_message(ty)
    {
        return Err(Error::StrictKexViolation(ty));
    }

    match ty {
        msg::SSH_MSG_DISCONNECT => {
            let message = Disconnect::decode(payload)?;

            Err(Error::PeerDisconnect {
                code: message.code,
                reason: message.description,
            })
        }
        msg::SSH_MSG_IGNORE => Ok(()),
        msg::SSH_MSG_UNIMPLEMENTED => Err(Error::PeerUnimplemented),
        msg::SSH_MSG_DEBUG => {
            let message = DebugMsg::decode(payload)?;
            tracing::debug!("Received a 'debug' message: {}", message.message);

            Ok(())
        }
        msg::SSH_MSG_EXT_INFO => {
            let info = ExtensionInfo::decode(payload)?;
            tracing::debug!("Peer announced {} extension(s)", info.extensions.len());

            *inner.ext_info.lock().expect("ext-info poisoned") = Some(Arc::new(info));

            Ok(())
        }
        ty if msg::is_kex_message(ty) => inner.engine().handle_message(Some(payload)),
        msg::SSH_MSG_USERAUTH_SUCCESS => {
            // Authentication went through: delayed compression starts
            // with the very next packet in each direction.
            inner.send.start_compression();
            inner
                .recv
                .lock()
                .expect("receive half poisoned")
                .start_compression();

            inner.router.dispatch(ty, payload)
        }
        ty => inner.router.dispatch(ty, payload),
    }
}
