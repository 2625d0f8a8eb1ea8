use super::session_arc;
use crate::backend::mech::Mechanism;
use crate::ck;
use crate::operation::OpCtxState;
use crate::{Error, Result};

/// See PKCS#11 v2.40 Section 5.13 Functions for verifying signatures

pub fn verify_init(
    session: ck::CK_SESSION_HANDLE,
    mech: &Mechanism,
    key: ck::CK_OBJECT_HANDLE,
) -> Result<()> {
    trace!("verify_init() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();
    session.verify_init(mech, key)
}

pub fn verify(session: ck::CK_SESSION_HANDLE, data: &[u8], signature: &[u8]) -> Result<()> {
    trace!("verify() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();

    if let Err(e) = session
        .verify_ctx()
        .as_mut()
        .ok_or(Error::OperationNotInitialized)
        .and_then(|ctx| ctx.enter_state(OpCtxState::SinglepartActive))
    {
        session.verify_ctx().take();
        return Err(e);
    }
    // Presence was established above.
    let ctx = session.verify_ctx().take().unwrap();
    ctx.verify(data, signature)
}

pub fn verify_update(session: ck::CK_SESSION_HANDLE, data: &[u8]) -> Result<()> {
    trace!("verify_update() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();
    let res = session
        .verify_ctx()
        .as_mut()
        .ok_or(Error::OperationNotInitialized)
        .and_then(|ctx| ctx.update(data));
    if res.is_err() {
        session.verify_ctx().take();
    }
    res
}

pub fn verify_final(session: ck::CK_SESSION_HANDLE, signature: &[u8]) -> Result<()> {
    trace!("verify_final() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();

    if let Err(e) = session
        .verify_ctx()
        .as_mut()
        .ok_or(Error::OperationNotInitialized)
        .and_then(|ctx| ctx.enter_state(OpCtxState::MultipartReady))
    {
        session.verify_ctx().take();
        return Err(e);
    }
    let ctx = session.verify_ctx().take().unwrap();
    ctx.finalize(signature)
}
