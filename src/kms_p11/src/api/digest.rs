use super::{copy_to_out, session_arc};
use crate::backend::mech::Mechanism;
use crate::ck;
use crate::operation::OpCtxState;
use crate::{Error, Result};

/// See PKCS#11 v2.40 Section 5.10 Message digesting functions.
/// Digesting is entirely local.

pub fn digest_init(session: ck::CK_SESSION_HANDLE, mech: &Mechanism) -> Result<()> {
    trace!("digest_init() called");

    let digest = match mech {
        Mechanism::Digest(digest) => *digest,
        _ => return Err(Error::MechanismInvalid),
    };
    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();
    session.digest_init(digest)
}

pub fn digest(
    session: ck::CK_SESSION_HANDLE,
    data: &[u8],
    out: Option<&mut [u8]>,
) -> Result<usize> {
    trace!("digest() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();

    let required = match session
        .digest_ctx()
        .as_mut()
        .ok_or(Error::OperationNotInitialized)
        .and_then(|ctx| {
            ctx.enter_state(OpCtxState::SinglepartActive)?;
            Ok(ctx.len())
        }) {
        Ok(len) => len,
        Err(e) => {
            session.digest_ctx().take();
            return Err(e);
        }
    };

    match out {
        None => Ok(required),
        Some(buf) if buf.len() < required => Err(Error::BufferTooSmall),
        Some(buf) => {
            // Presence was established above.
            let ctx = session.digest_ctx().take().unwrap();
            let md = ctx.digest(data)?;
            Ok(copy_to_out(&md, buf))
        }
    }
}

pub fn digest_update(session: ck::CK_SESSION_HANDLE, data: &[u8]) -> Result<()> {
    trace!("digest_update() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();
    let res = session
        .digest_ctx()
        .as_mut()
        .ok_or(Error::OperationNotInitialized)
        .and_then(|ctx| ctx.update(data));
    if res.is_err() {
        session.digest_ctx().take();
    }
    res
}

pub fn digest_final(session: ck::CK_SESSION_HANDLE, out: Option<&mut [u8]>) -> Result<usize> {
    trace!("digest_final() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();

    let required = match session
        .digest_ctx()
        .as_mut()
        .ok_or(Error::OperationNotInitialized)
        .and_then(|ctx| {
            ctx.enter_state(OpCtxState::MultipartReady)?;
            Ok(ctx.len())
        }) {
        Ok(len) => len,
        Err(e) => {
            session.digest_ctx().take();
            return Err(e);
        }
    };

    match out {
        None => Ok(required),
        Some(buf) if buf.len() < required => Err(Error::BufferTooSmall),
        Some(buf) => {
            let ctx = session.digest_ctx().take().unwrap();
            let md = ctx.finalize()?;
            Ok(copy_to_out(&md, buf))
        }
    }
}
