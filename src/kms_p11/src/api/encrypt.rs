use super::{copy_to_out, session_arc};
use crate::backend::mech::Mechanism;
use crate::ck;
use crate::operation::OpCtxState;
use crate::{Error, Result};

/// See PKCS#11 v2.40 Section 5.8 Encryption functions.
/// Encryption is local-only; multi-part flows are not offered.

pub fn encrypt_init(
    session: ck::CK_SESSION_HANDLE,
    mech: &Mechanism,
    key: ck::CK_OBJECT_HANDLE,
) -> Result<()> {
    trace!("encrypt_init() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();
    session.encrypt_init(mech, key)
}

pub fn encrypt(
    session: ck::CK_SESSION_HANDLE,
    data: &[u8],
    ciphertext: Option<&mut [u8]>,
) -> Result<usize> {
    trace!("encrypt() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();

    let required = match session
        .encrypt_ctx()
        .as_mut()
        .ok_or(Error::OperationNotInitialized)
        .and_then(|ctx| {
            ctx.enter_state(OpCtxState::SinglepartActive)?;
            Ok(ctx.output_length())
        }) {
        Ok(len) => len,
        Err(e) => {
            session.encrypt_ctx().take();
            return Err(e);
        }
    };

    match ciphertext {
        None => Ok(required),
        Some(buf) if buf.len() < required => Err(Error::BufferTooSmall),
        Some(buf) => {
            // Presence was established above.
            let ctx = session.encrypt_ctx().take().unwrap();
            let out = ctx.encrypt(data)?;
            Ok(copy_to_out(&out, buf))
        }
    }
}
