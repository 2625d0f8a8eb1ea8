use std::cmp;
use std::sync::Arc;

use super::attr::SearchTemplate;
use super::handle;
use super::mech::{validate_for_key, KeyOp, MechDigest, Mechanism};
use super::slot::Slot;
use crate::ck;
use crate::operation::{decrypt, encrypt, sign, verify};
use crate::operation::{DecryptCtx, DigestCtx, EncryptCtx, SignCtx, VerifyCtx};
use crate::{Error, Result};

/// Find-operation cursor over the handles selected at FindObjectsInit
/// time. The selection runs against the object-set snapshot taken then;
/// a concurrent slot refresh does not disturb it.
struct EnumCtx {
    handles: Vec<ck::CK_OBJECT_HANDLE>,
    index: usize,
}

impl EnumCtx {
    fn new(handles: Vec<ck::CK_OBJECT_HANDLE>) -> Self {
        Self { handles, index: 0 }
    }

    fn next_chunk(&mut self, count: usize) -> Vec<ck::CK_OBJECT_HANDLE> {
        let end = cmp::min(self.index + count, self.handles.len());
        let ret = self.handles[self.index..end].to_vec();
        self.index = end;
        ret
    }
}

/// Per-session state: the slot reference, the read-only/read-write flag,
/// and at most one pending operation per category. The standard makes all
/// operation categories mutually exclusive with themselves but not with
/// each other, hence one slot per category.
pub struct Session {
    slot: Arc<Slot>,
    rw: bool,
    enum_ctx: Option<EnumCtx>,
    digest_ctx: Option<DigestCtx>,
    sign_ctx: Option<Box<dyn SignCtx>>,
    verify_ctx: Option<Box<dyn VerifyCtx>>,
    encrypt_ctx: Option<Box<dyn EncryptCtx>>,
    decrypt_ctx: Option<Box<dyn DecryptCtx>>,
}

impl Session {
    pub fn new(slot: Arc<Slot>, rw: bool) -> Self {
        Self {
            slot,
            rw,
            enum_ctx: None,
            digest_ctx: None,
            sign_ctx: None,
            verify_ctx: None,
            encrypt_ctx: None,
            decrypt_ctx: None,
        }
    }

    pub fn slot(&self) -> &Arc<Slot> {
        &self.slot
    }

    pub fn is_rw(&self) -> bool {
        self.rw
    }

    pub fn ck_info(&self) -> ck::CK_SESSION_INFO {
        let state = match (self.rw, self.slot.login_state()) {
            (false, None) => ck::CKS_RO_PUBLIC_SESSION,
            (false, Some(_)) => ck::CKS_RO_USER_FUNCTIONS,
            (true, None) => ck::CKS_RW_PUBLIC_SESSION,
            (true, Some(ck::CKU_SO)) => ck::CKS_RW_SO_FUNCTIONS,
            (true, Some(_)) => ck::CKS_RW_USER_FUNCTIONS,
        };
        let mut flags = ck::CKF_SERIAL_SESSION;
        if self.rw {
            flags |= ck::CKF_RW_SESSION;
        }
        ck::CK_SESSION_INFO {
            slot_id: self.slot.id(),
            state,
            flags,
            device_error: 0,
        }
    }

    /// Select the matching objects from the slot's current snapshot and
    /// park the handles on the session.
    pub fn find_init(&mut self, template: &SearchTemplate) -> Result<()> {
        if self.enum_ctx.is_some() {
            return Err(Error::OperationActive);
        }
        let snapshot = self.slot.object_set();
        let handles = snapshot
            .iter()
            .filter(|(_, obj)| obj.match_attr_template(template))
            .map(|(h, _)| *h)
            .collect();
        self.enum_ctx = Some(EnumCtx::new(handles));
        Ok(())
    }

    pub fn find_next(&mut self, max: usize) -> Result<Vec<ck::CK_OBJECT_HANDLE>> {
        self.enum_ctx
            .as_mut()
            .map(|ctx| ctx.next_chunk(max))
            .ok_or(Error::OperationNotInitialized)
    }

    pub fn find_final(&mut self) -> Result<()> {
        self.enum_ctx
            .take()
            .map(|_| ())
            .ok_or(Error::OperationNotInitialized)
    }

    pub fn digest_init(&mut self, digest: MechDigest) -> Result<()> {
        if self.digest_ctx.is_some() {
            return Err(Error::OperationActive);
        }
        self.digest_ctx = Some(DigestCtx::new(digest));
        Ok(())
    }

    pub fn digest_ctx(&mut self) -> &mut Option<DigestCtx> {
        &mut self.digest_ctx
    }

    pub fn sign_init(&mut self, mech: &Mechanism, key: ck::CK_OBJECT_HANDLE) -> Result<()> {
        if self.sign_ctx.is_some() {
            return Err(Error::OperationActive);
        }
        let key = handle::object(key).ok_or(Error::KeyHandleInvalid)?;
        validate_for_key(mech, KeyOp::Sign, &key)?;
        self.sign_ctx = Some(sign::new_sign_ctx(mech, key, self.slot.client())?);
        Ok(())
    }

    pub fn sign_ctx(&mut self) -> &mut Option<Box<dyn SignCtx>> {
        &mut self.sign_ctx
    }

    pub fn verify_init(&mut self, mech: &Mechanism, key: ck::CK_OBJECT_HANDLE) -> Result<()> {
        if self.verify_ctx.is_some() {
            return Err(Error::OperationActive);
        }
        let key = handle::object(key).ok_or(Error::KeyHandleInvalid)?;
        validate_for_key(mech, KeyOp::Verify, &key)?;
        self.verify_ctx = Some(verify::new_verify_ctx(mech, key)?);
        Ok(())
    }

    pub fn verify_ctx(&mut self) -> &mut Option<Box<dyn VerifyCtx>> {
        &mut self.verify_ctx
    }

    pub fn encrypt_init(&mut self, mech: &Mechanism, key: ck::CK_OBJECT_HANDLE) -> Result<()> {
        if self.encrypt_ctx.is_some() {
            return Err(Error::OperationActive);
        }
        let key = handle::object(key).ok_or(Error::KeyHandleInvalid)?;
        validate_for_key(mech, KeyOp::Encrypt, &key)?;
        self.encrypt_ctx = Some(encrypt::new_encrypt_ctx(mech, key)?);
        Ok(())
    }

    pub fn encrypt_ctx(&mut self) -> &mut Option<Box<dyn EncryptCtx>> {
        &mut self.encrypt_ctx
    }

    pub fn decrypt_init(&mut self, mech: &Mechanism, key: ck::CK_OBJECT_HANDLE) -> Result<()> {
        if self.decrypt_ctx.is_some() {
            return Err(Error::OperationActive);
        }
        let key = handle::object(key).ok_or(Error::KeyHandleInvalid)?;
        validate_for_key(mech, KeyOp::Decrypt, &key)?;
        self.decrypt_ctx = Some(decrypt::new_decrypt_ctx(mech, key, self.slot.client())?);
        Ok(())
    }

    pub fn decrypt_ctx(&mut self) -> &mut Option<Box<dyn DecryptCtx>> {
        &mut self.decrypt_ctx
    }
}
