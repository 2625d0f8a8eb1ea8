// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use kms_rpc::api::{KeyPurpose, KeyVersionState, KmsClient};

use super::algorithm;
use super::handle;
use super::object::{Object, ObjectSet};
use crate::config::SlotConfig;
use crate::{ck, defs};
use crate::{Error, Result};

/// A slot binds one KMS key ring and publishes its enabled key versions
/// as an atomically swapped object-set snapshot. Sessions and the token
/// login state are tracked here as well; the "token" of the standard is
/// inseparable from its slot in this provider, so one type models both.
pub struct Slot {
    id: ck::CK_SLOT_ID,
    key_ring: String,
    label: String,
    client: Arc<dyn KmsClient>,
    objects: RwLock<Arc<ObjectSet>>,
    /// Open session handles with their read-write flag.
    sessions: Mutex<HashMap<ck::CK_SESSION_HANDLE, bool>>,
    /// Token-wide login state; PIN checks are accepted unconditionally.
    login: Mutex<Option<ck::CK_USER_TYPE>>,
}

impl Slot {
    pub fn open(
        id: ck::CK_SLOT_ID,
        config: &SlotConfig,
        client: Arc<dyn KmsClient>,
    ) -> Result<Self> {
        let slot = Self {
            id,
            key_ring: config.key_ring.clone(),
            label: config.token_label().to_string(),
            client,
            objects: RwLock::new(Arc::new(ObjectSet::empty())),
            sessions: Mutex::new(HashMap::new()),
            login: Mutex::new(None),
        };
        let set = slot.load_object_set()?;
        *slot.objects.write().unwrap() = Arc::new(set);
        info!(
            "slot {}: loaded {} objects from {}",
            id,
            slot.object_set().len(),
            slot.key_ring
        );
        Ok(slot)
    }

    /// Enumerate the key ring and materialise two objects per enabled,
    /// supported key version. Key versions with algorithms or purposes
    /// this provider does not handle are skipped, not errors.
    fn load_object_set(&self) -> Result<ObjectSet> {
        let keys = self.client.list_crypto_keys(&self.key_ring)?;
        let mut entries = Vec::new();
        for key in keys {
            match key.purpose {
                KeyPurpose::AsymmetricSign | KeyPurpose::AsymmetricDecrypt => (),
                _ => {
                    debug!("skipping {}: unsupported purpose", key.name);
                    continue;
                }
            }
            for ckv in self.client.list_crypto_key_versions(&key.name)? {
                if ckv.state != KeyVersionState::Enabled {
                    continue;
                }
                if algorithm::details(ckv.algorithm).is_err() {
                    warn!("skipping {}: unsupported algorithm", ckv.name);
                    continue;
                }
                let pk = self.client.get_public_key(&ckv.name)?;
                if crc32c::crc32c(pk.pem.as_bytes()) != pk.pem_crc32c {
                    error!("public key PEM checksum mismatch for {}", ckv.name);
                    return Err(Error::DeviceError);
                }
                if pk.algorithm != ckv.algorithm {
                    error!("public key algorithm mismatch for {}", ckv.name);
                    return Err(Error::DeviceError);
                }
                let (pub_obj, prv_obj) = Object::new_key_pair(&ckv, &pk.pem)?;
                for obj in [pub_obj, prv_obj] {
                    let obj = Arc::new(obj);
                    entries.push((handle::register_object(obj.clone()), obj));
                }
            }
        }
        Ok(ObjectSet::new(entries))
    }

    /// Rebuild the object set and swap it in. On failure the previous set
    /// stays published. In-flight operations keep their snapshot; handles
    /// belonging to the replaced set stop resolving.
    pub fn refresh(&self) -> Result<()> {
        let new_set = Arc::new(self.load_object_set()?);
        let old_set = {
            let mut guard = self.objects.write().unwrap();
            std::mem::replace(&mut *guard, new_set)
        };
        for (h, _) in old_set.iter() {
            handle::release_object(*h);
        }
        Ok(())
    }

    pub fn object_set(&self) -> Arc<ObjectSet> {
        self.objects.read().unwrap().clone()
    }

    pub fn client(&self) -> Arc<dyn KmsClient> {
        self.client.clone()
    }

    pub fn id(&self) -> ck::CK_SLOT_ID {
        self.id
    }

    pub fn key_ring(&self) -> &str {
        &self.key_ring
    }

    pub fn register_session(&self, session: ck::CK_SESSION_HANDLE, rw: bool) {
        self.sessions.lock().unwrap().insert(session, rw);
    }

    pub fn unregister_session(&self, session: ck::CK_SESSION_HANDLE) {
        self.sessions.lock().unwrap().remove(&session);
    }

    pub fn session_handles(&self) -> Vec<ck::CK_SESSION_HANDLE> {
        self.sessions.lock().unwrap().keys().copied().collect()
    }

    fn session_counts(&self) -> (usize, usize) {
        let sessions = self.sessions.lock().unwrap();
        let rw = sessions.values().filter(|rw| **rw).count();
        (sessions.len(), rw)
    }

    pub fn has_ro_session(&self) -> bool {
        self.sessions.lock().unwrap().values().any(|rw| !*rw)
    }

    pub fn login_state(&self) -> Option<ck::CK_USER_TYPE> {
        *self.login.lock().unwrap()
    }

    /// Login is functionally a no-op: any PIN is accepted, and the state
    /// only drives session-info reporting and the open-session matrix.
    pub fn login(&self, user: ck::CK_USER_TYPE) -> Result<()> {
        let mut login = self.login.lock().unwrap();
        if login.is_some() {
            return Err(Error::UserAlreadyLoggedIn);
        }
        if user == ck::CKU_SO && self.has_ro_session() {
            return Err(Error::SessionReadOnlyExists);
        }
        *login = Some(user);
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        self.login
            .lock()
            .unwrap()
            .take()
            .map(|_| ())
            .ok_or(Error::UserNotLoggedIn)
    }

    /// Drop all sessions and deregister every object handle. Called on
    /// finalize; the underlying drops cannot fail, so this is total.
    pub fn teardown(&self) {
        let handles: Vec<_> = self.sessions.lock().unwrap().drain().collect();
        for (h, _) in handles {
            handle::release_session(h);
        }
        for (h, _) in self.object_set().iter() {
            handle::release_object(*h);
        }
        *self.login.lock().unwrap() = None;
    }

    pub fn ck_slot_info(&self) -> ck::CK_SLOT_INFO {
        ck::CK_SLOT_INFO {
            slot_description: ck_padded_str!(defs::SLOT_DESCRIPTION, 64),
            manufacturer_id: ck_padded_str!(defs::MANUFACTURER, 32),
            flags: ck::CKF_TOKEN_PRESENT,
            hardware_version: defs::SLOT_HARDWARE_VERSION,
            firmware_version: defs::SLOT_FIRMWARE_VERSION,
        }
    }

    pub fn ck_token_info(&self) -> ck::CK_TOKEN_INFO {
        let (session_count, rw_session_count) = self.session_counts();
        let serial = format!("KMS{:02}", self.id);
        ck::CK_TOKEN_INFO {
            label: ck_padded_str!(self.label.as_str(), 32),
            manufacturer_id: ck_padded_str!(defs::MANUFACTURER, 32),
            model: ck_padded_str!(defs::TOKEN_MODEL, 16),
            serial_number: ck_padded_str!(serial.as_str(), 16),
            flags: ck::CKF_TOKEN_INITIALIZED
                | ck::CKF_USER_PIN_INITIALIZED
                | ck::CKF_WRITE_PROTECTED
                | ck::CKF_RNG,
            max_session_count: ck::CK_EFFECTIVELY_INFINITE,
            session_count: session_count as ck::CK_ULONG,
            max_rw_session_count: ck::CK_EFFECTIVELY_INFINITE,
            rw_session_count: rw_session_count as ck::CK_ULONG,
            max_pin_len: defs::TOKEN_MAX_PIN_LEN,
            min_pin_len: defs::TOKEN_MIN_PIN_LEN,
            total_public_memory: ck::CK_UNAVAILABLE_INFORMATION,
            free_public_memory: ck::CK_UNAVAILABLE_INFORMATION,
            total_private_memory: ck::CK_UNAVAILABLE_INFORMATION,
            free_private_memory: ck::CK_UNAVAILABLE_INFORMATION,
            hardware_version: defs::SLOT_HARDWARE_VERSION,
            firmware_version: defs::SLOT_FIRMWARE_VERSION,
            utc_time: ck_padded_str!(defs::TOKEN_UTC_TIME, 16),
        }
    }
}
