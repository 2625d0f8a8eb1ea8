use std::sync::{Arc, Mutex};

use super::{session_arc, with_provider};
use crate::backend::handle;
use crate::backend::session::Session;
use crate::ck;
use crate::{Error, Result};

/// See PKCS#11 v2.40 Section 5.6 Session management functions
pub fn open_session(slot_id: ck::CK_SLOT_ID, flags: ck::CK_FLAGS) -> Result<ck::CK_SESSION_HANDLE> {
    trace!("open_session() called, slot={} flags={:#x}", slot_id, flags);

    if flags & ck::CKF_SERIAL_SESSION == 0 {
        return Err(Error::SessionParallelNotSupported);
    }
    let rw = flags & ck::CKF_RW_SESSION != 0;

    let slot = with_provider(|provider| Ok(provider.slot(slot_id)?.clone()))?;
    // A read-only session cannot coexist with an SO login on the token.
    if !rw && slot.login_state() == Some(ck::CKU_SO) {
        return Err(Error::SessionReadWriteSoExists);
    }

    let session = Arc::new(Mutex::new(Session::new(slot.clone(), rw)));
    let handle = handle::register_session(session);
    slot.register_session(handle, rw);
    Ok(handle)
}

/// Closing a session cancels any pending operation without invoking the
/// KMS: the operation objects are simply dropped. Taking the session
/// mutex first lets an in-flight call on another thread run to
/// completion; its result is discarded with the session.
pub fn close_session(handle: ck::CK_SESSION_HANDLE) -> Result<()> {
    trace!("close_session() called");

    let sarc = handle::release_session(handle).ok_or(Error::SessionHandleInvalid)?;
    let slot = {
        let session = sarc.lock().unwrap();
        session.slot().clone()
    };
    slot.unregister_session(handle);
    Ok(())
}

/// Atomic: every session of the slot is closed, or (when the slot id is
/// bad) none.
pub fn close_all_sessions(slot_id: ck::CK_SLOT_ID) -> Result<()> {
    trace!("close_all_sessions() called");

    let slot = with_provider(|provider| Ok(provider.slot(slot_id)?.clone()))?;
    for handle in slot.session_handles() {
        handle::release_session(handle);
        slot.unregister_session(handle);
    }
    Ok(())
}

pub fn get_session_info(handle: ck::CK_SESSION_HANDLE) -> Result<ck::CK_SESSION_INFO> {
    trace!("get_session_info() called");

    let sarc = session_arc(handle)?;
    let session = sarc.lock().unwrap();
    Ok(session.ck_info())
}
