use super::{copy_to_out, session_arc};
use crate::backend::mech::Mechanism;
use crate::ck;
use crate::operation::OpCtxState;
use crate::{Error, Result};

/// See PKCS#11 v2.40 Section 5.9 Decryption functions.
/// Decryption ships to the KMS; multi-part flows are not offered.

pub fn decrypt_init(
    session: ck::CK_SESSION_HANDLE,
    mech: &Mechanism,
    key: ck::CK_OBJECT_HANDLE,
) -> Result<()> {
    trace!("decrypt_init() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();
    session.decrypt_init(mech, key)
}

pub fn decrypt(
    session: ck::CK_SESSION_HANDLE,
    ciphertext: &[u8],
    plaintext: Option<&mut [u8]>,
) -> Result<usize> {
    trace!("decrypt() called");

    let sarc = session_arc(session)?;
    let mut session = sarc.lock().unwrap();

    // The plaintext length is only known after the remote call; the
    // context performs it once and caches the result, so the probe and
    // the producing call agree without a second round trip.
    let required = match session
        .decrypt_ctx()
        .as_mut()
        .ok_or(Error::OperationNotInitialized)
        .and_then(|ctx| {
            ctx.enter_state(OpCtxState::SinglepartActive)?;
            ctx.required_length(ciphertext)
        }) {
        Ok(len) => len,
        Err(e) => {
            session.decrypt_ctx().take();
            return Err(e);
        }
    };

    match plaintext {
        None => Ok(required),
        Some(buf) if buf.len() < required => Err(Error::BufferTooSmall),
        Some(buf) => {
            // Presence was established above.
            let ctx = session.decrypt_ctx().take().unwrap();
            let out = ctx.decrypt(ciphertext)?;
            Ok(copy_to_out(&out, buf))
        }
    }
}
