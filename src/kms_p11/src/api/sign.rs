use super::{copy_to_out, session_arc};
use crate::backend::mech::Mechanism;
use crate::ck;
use crate::operation::OpCtxState;
use crate::{Error, Result};

/// See PKCS#11 v2.40 Section 5.12 Signing and MACing functions

pub fn sign_init(
    session: ck::CK_SESSION_HANDLE,
    mech: &Mechanism,
    key: ck::CK_OBJECT_HANDLE,
) -> Result<()> {
    trace!("sign_init() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();
    session.sign_init(mech, key)
}

pub fn sign(
    session: ck::CK_SESSION_HANDLE,
    data: &[u8],
    signature: Option<&mut [u8]>,
) -> Result<usize> {
    trace!("sign() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();

    let required = match session
        .sign_ctx()
        .as_mut()
        .ok_or(Error::OperationNotInitialized)
        .and_then(|ctx| {
            ctx.enter_state(OpCtxState::SinglepartActive)?;
            Ok(ctx.signature_length())
        }) {
        Ok(len) => len,
        Err(e) => {
            session.sign_ctx().take();
            return Err(e);
        }
    };

    match signature {
        None => Ok(required),
        Some(buf) if buf.len() < required => Err(Error::BufferTooSmall),
        Some(buf) => {
            // Presence was established above.
            let ctx = session.sign_ctx().take().unwrap();
            let sig = ctx.sign(data)?;
            Ok(copy_to_out(&sig, buf))
        }
    }
}

pub fn sign_update(session: ck::CK_SESSION_HANDLE, data: &[u8]) -> Result<()> {
    trace!("sign_update() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();
    let res = session
        .sign_ctx()
        .as_mut()
        .ok_or(Error::OperationNotInitialized)
        .and_then(|ctx| ctx.update(data));
    if res.is_err() {
        session.sign_ctx().take();
    }
    res
}

pub fn sign_final(
    session: ck::CK_SESSION_HANDLE,
    signature: Option<&mut [u8]>,
) -> Result<usize> {
    trace!("sign_final() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();

    let required = match session
        .sign_ctx()
        .as_mut()
        .ok_or(Error::OperationNotInitialized)
        .and_then(|ctx| {
            ctx.enter_state(OpCtxState::MultipartReady)?;
            Ok(ctx.signature_length())
        }) {
        Ok(len) => len,
        Err(e) => {
            session.sign_ctx().take();
            return Err(e);
        }
    };

    match signature {
        None => Ok(required),
        Some(buf) if buf.len() < required => Err(Error::BufferTooSmall),
        Some(buf) => {
            let ctx = session.sign_ctx().take().unwrap();
            let sig = ctx.finalize()?;
            Ok(copy_to_out(&sig, buf))
        }
    }
}
