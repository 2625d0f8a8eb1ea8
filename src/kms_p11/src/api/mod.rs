// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The token API surface: name-equivalent safe renditions of the
//! standard's entry points, over opaque handles. Output-producing calls
//! take `Option<&mut [u8]>`, where `None` is the null-buffer length probe
//! of the two-call convention.

pub mod decrypt;
pub mod digest;
pub mod encrypt;
pub mod object;
pub mod random;
pub mod session;
pub mod sign;
pub mod token;
pub mod verify;

pub use decrypt::*;
pub use digest::*;
pub use encrypt::*;
pub use object::*;
pub use random::*;
pub use session::*;
pub use sign::*;
pub use token::*;
pub use verify::*;

use std::sync::{Arc, Mutex};

use kms_rpc::api::KmsClient;

use crate::backend::handle;
use crate::backend::provider::Provider;
use crate::backend::session::Session;
use crate::config::Config;
use crate::util::logger::Logger;
use crate::{ck, data};
use crate::{Error, Result};

/// Bring the provider up: open every configured slot against the given
/// KMS client and publish the singleton.
pub fn initialize(config: &Config, client: Arc<dyn KmsClient>) -> Result<()> {
    Logger::init();
    trace!("initialize() called");

    let mut guard = data::PROVIDER.lock().unwrap();
    if guard.is_some() {
        return Err(Error::CryptokiAlreadyInitialized);
    }
    let provider = Provider::new(config, client)?;
    guard.replace(provider);
    Ok(())
}

pub fn finalize() -> Result<()> {
    trace!("finalize() called");

    let mut guard = data::PROVIDER.lock().unwrap();
    match guard.take() {
        Some(provider) => {
            provider.teardown();
            Ok(())
        }
        None => Err(Error::CryptokiNotInitialized),
    }
}

pub fn get_info() -> Result<ck::CK_INFO> {
    trace!("get_info() called");
    with_provider(|provider| Ok(provider.ck_info()))
}

pub(crate) fn with_provider<T, F>(f: F) -> Result<T>
where
    F: FnOnce(&Provider) -> Result<T>,
{
    let guard = data::PROVIDER.lock().unwrap();
    f(guard.as_ref().ok_or(Error::CryptokiNotInitialized)?)
}

pub(crate) fn session_arc(handle: ck::CK_SESSION_HANDLE) -> Result<Arc<Mutex<Session>>> {
    handle::session(handle).ok_or(Error::SessionHandleInvalid)
}

/// Copy a produced output into the caller's (already length-checked)
/// buffer and report the written length.
pub(crate) fn copy_to_out(src: &[u8], out: &mut [u8]) -> usize {
    out[..src.len()].copy_from_slice(src);
    src.len()
}
