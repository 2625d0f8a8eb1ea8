// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use kms_rpc::api::KmsClient;

use super::slot::Slot;
use crate::config::Config;
use crate::{ck, defs};
use crate::{Error, Result};

/// The root container: one slot per configured key ring. Immutable after
/// construction apart from the per-slot object-set swaps.
pub struct Provider {
    slots: Vec<Arc<Slot>>,
}

impl Provider {
    pub fn new(config: &Config, client: Arc<dyn KmsClient>) -> Result<Self> {
        let mut slots = Vec::with_capacity(config.slots.len());
        for (id, slot_config) in config.slots.iter().enumerate() {
            match Slot::open(id as ck::CK_SLOT_ID, slot_config, client.clone()) {
                Ok(slot) => slots.push(Arc::new(slot)),
                Err(e) => {
                    // Roll back the slots opened so far; a half-configured
                    // provider must not leak registered handles.
                    for slot in &slots {
                        slot.teardown();
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self { slots })
    }

    pub fn ck_info(&self) -> ck::CK_INFO {
        ck::CK_INFO {
            cryptoki_version: defs::CRYPTOKI_VERSION,
            manufacturer_id: ck_padded_str!(defs::MANUFACTURER, 32),
            flags: 0,
            library_description: ck_padded_str!(defs::LIBRARY_DESCRIPTION, 32),
            library_version: defs::LIBRARY_VERSION,
        }
    }

    pub fn slot(&self, id: ck::CK_SLOT_ID) -> Result<&Arc<Slot>> {
        self.slots.get(id as usize).ok_or(Error::SlotIdInvalid)
    }

    pub fn slots(&self) -> &[Arc<Slot>] {
        &self.slots
    }

    pub fn teardown(&self) {
        for slot in &self.slots {
            slot.teardown();
        }
    }
}
