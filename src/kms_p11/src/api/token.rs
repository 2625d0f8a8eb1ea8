use super::{session_arc, with_provider};
use crate::backend::{algorithm, mech};
use crate::ck;
use crate::{Error, Result};

/// See PKCS#11 v2.40 Section 5.5 Slot and token management functions

pub fn get_slot_list(_token_present: bool) -> Result<Vec<ck::CK_SLOT_ID>> {
    trace!("get_slot_list() called");
    // Every configured slot carries a token.
    with_provider(|provider| Ok((0..provider.slots().len() as ck::CK_SLOT_ID).collect()))
}

pub fn get_slot_info(slot_id: ck::CK_SLOT_ID) -> Result<ck::CK_SLOT_INFO> {
    trace!("get_slot_info() called");
    with_provider(|provider| Ok(provider.slot(slot_id)?.ck_slot_info()))
}

pub fn get_token_info(slot_id: ck::CK_SLOT_ID) -> Result<ck::CK_TOKEN_INFO> {
    trace!("get_token_info() called");
    with_provider(|provider| Ok(provider.slot(slot_id)?.ck_token_info()))
}

pub fn get_mechanism_list(slot_id: ck::CK_SLOT_ID) -> Result<Vec<ck::CK_MECHANISM_TYPE>> {
    trace!("get_mechanism_list() called");
    with_provider(|provider| {
        provider.slot(slot_id)?;
        Ok(algorithm::supported_mechanisms().to_vec())
    })
}

pub fn get_mechanism_info(
    slot_id: ck::CK_SLOT_ID,
    mech_type: ck::CK_MECHANISM_TYPE,
) -> Result<ck::CK_MECHANISM_INFO> {
    trace!("get_mechanism_info() called");
    with_provider(|provider| {
        provider.slot(slot_id)?;
        mech::info_for_type(mech_type)
    })
}

/// Caller-driven refresh: re-enumerate the slot's key ring and publish a
/// new object set. On failure the previous set stays in place.
pub fn refresh_token(slot_id: ck::CK_SLOT_ID) -> Result<()> {
    trace!("refresh_token() called");
    let slot = with_provider(|provider| Ok(provider.slot(slot_id)?.clone()))?;
    slot.refresh()
}

/// Login is accepted unconditionally (the KMS channel authenticates the
/// caller, not a PIN) but the state transition rules still apply.
pub fn login(
    handle: ck::CK_SESSION_HANDLE,
    user_type: ck::CK_USER_TYPE,
    _pin: &[u8],
) -> Result<()> {
    trace!("login() called");

    match user_type {
        ck::CKU_SO | ck::CKU_USER | ck::CKU_CONTEXT_SPECIFIC => (),
        _ => return Err(Error::UserTypeInvalid),
    }
    let sarc = session_arc(handle)?;
    let slot = {
        let session = sarc.lock().unwrap();
        session.slot().clone()
    };
    slot.login(user_type)
}

pub fn logout(handle: ck::CK_SESSION_HANDLE) -> Result<()> {
    trace!("logout() called");

    let sarc = session_arc(handle)?;
    let slot = {
        let session = sarc.lock().unwrap();
        session.slot().clone()
    };
    slot.logout()
}
