// Copyright 2020-2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! PKCS#11 provider core backed by a remote KMS.
//!
//! Keys live in a remote key-management service; the provider surfaces them
//! as token objects and forwards private-key operations over an
//! authenticated RPC channel. No private key material is ever present in
//! the process; only public keys and key metadata are cached locally.
//!
//! The crate is ABI-free. `api` exposes the standard's entry points as safe
//! Rust functions over opaque `u64` handles; a thin C shim (out of scope
//! here) maps the Cryptoki function table onto them.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

#[macro_use]
mod util;
pub mod api;
pub mod backend;
pub mod ck;
pub mod config;
pub mod operation;

/// Device, slot and token capabilities and information
pub(crate) mod defs {
    use crate::ck;

    pub const CRYPTOKI_VERSION: ck::CK_VERSION = ck_version!(2, 40);

    pub const MANUFACTURER: &str = "KMS-P11";
    pub const LIBRARY_DESCRIPTION: &str = "KMS PKCS#11 provider";
    pub const LIBRARY_VERSION: ck::CK_VERSION = ck_version!(0, 1);

    pub const SLOT_DESCRIPTION: &str = "KMS key ring slot";
    pub const SLOT_HARDWARE_VERSION: ck::CK_VERSION = ck_version!(0, 1);
    pub const SLOT_FIRMWARE_VERSION: ck::CK_VERSION = ck_version!(0, 1);

    pub const TOKEN_MODEL: &str = "KMS token";
    pub const TOKEN_MAX_PIN_LEN: ck::CK_ULONG = 64;
    pub const TOKEN_MIN_PIN_LEN: ck::CK_ULONG = 0;
    pub const TOKEN_UTC_TIME: &str = "";
}

pub(crate) mod data {
    use std::sync::Mutex;

    use crate::backend::provider::Provider;

    lazy_static! {
        /// The provider singleton guarding the initialize / finalize
        /// lifecycle. Operation entry points resolve sessions through the
        /// handle registry instead, so they do not contend on this lock.
        pub static ref PROVIDER: Mutex<Option<Provider>> = Mutex::new(None);
    }
}

/// Crate-wide fault taxonomy. Every variant maps onto exactly one Cryptoki
/// return value; the mapping is the only thing the public surface exposes,
/// while log records carry the source location of the original fault.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    ArgumentsBad,
    AttributeSensitive,
    AttributeTypeInvalid,
    BufferTooSmall,
    CryptokiAlreadyInitialized,
    CryptokiNotInitialized,
    DataInvalid,
    DataLenRange,
    DeviceError,
    DeviceRemoved,
    EncryptedDataLenRange,
    FunctionFailed,
    GeneralError,
    KeyFunctionNotPermitted,
    KeyHandleInvalid,
    KeyTypeInconsistent,
    MechanismInvalid,
    MechanismParamInvalid,
    ObjectHandleInvalid,
    OperationActive,
    OperationNotInitialized,
    RandomSeedNotSupported,
    SessionHandleInvalid,
    SessionParallelNotSupported,
    SessionReadOnlyExists,
    SessionReadWriteSoExists,
    SignatureInvalid,
    SignatureLenRange,
    SlotIdInvalid,
    UserAlreadyLoggedIn,
    UserNotLoggedIn,
    UserTypeInvalid,
}

impl Error {
    pub fn ck_rv(&self) -> ck::CK_RV {
        match self {
            Self::ArgumentsBad => ck::CKR_ARGUMENTS_BAD,
            Self::AttributeSensitive => ck::CKR_ATTRIBUTE_SENSITIVE,
            Self::AttributeTypeInvalid => ck::CKR_ATTRIBUTE_TYPE_INVALID,
            Self::BufferTooSmall => ck::CKR_BUFFER_TOO_SMALL,
            Self::CryptokiAlreadyInitialized => ck::CKR_CRYPTOKI_ALREADY_INITIALIZED,
            Self::CryptokiNotInitialized => ck::CKR_CRYPTOKI_NOT_INITIALIZED,
            Self::DataInvalid => ck::CKR_DATA_INVALID,
            Self::DataLenRange => ck::CKR_DATA_LEN_RANGE,
            Self::DeviceError => ck::CKR_DEVICE_ERROR,
            Self::DeviceRemoved => ck::CKR_DEVICE_REMOVED,
            Self::EncryptedDataLenRange => ck::CKR_ENCRYPTED_DATA_LEN_RANGE,
            Self::FunctionFailed => ck::CKR_FUNCTION_FAILED,
            Self::GeneralError => ck::CKR_GENERAL_ERROR,
            Self::KeyFunctionNotPermitted => ck::CKR_KEY_FUNCTION_NOT_PERMITTED,
            Self::KeyHandleInvalid => ck::CKR_KEY_HANDLE_INVALID,
            Self::KeyTypeInconsistent => ck::CKR_KEY_TYPE_INCONSISTENT,
            Self::MechanismInvalid => ck::CKR_MECHANISM_INVALID,
            Self::MechanismParamInvalid => ck::CKR_MECHANISM_PARAM_INVALID,
            Self::ObjectHandleInvalid => ck::CKR_OBJECT_HANDLE_INVALID,
            Self::OperationActive => ck::CKR_OPERATION_ACTIVE,
            Self::OperationNotInitialized => ck::CKR_OPERATION_NOT_INITIALIZED,
            Self::RandomSeedNotSupported => ck::CKR_RANDOM_SEED_NOT_SUPPORTED,
            Self::SessionHandleInvalid => ck::CKR_SESSION_HANDLE_INVALID,
            Self::SessionParallelNotSupported => ck::CKR_SESSION_PARALLEL_NOT_SUPPORTED,
            Self::SessionReadOnlyExists => ck::CKR_SESSION_READ_ONLY_EXISTS,
            Self::SessionReadWriteSoExists => ck::CKR_SESSION_READ_WRITE_SO_EXISTS,
            Self::SignatureInvalid => ck::CKR_SIGNATURE_INVALID,
            Self::SignatureLenRange => ck::CKR_SIGNATURE_LEN_RANGE,
            Self::SlotIdInvalid => ck::CKR_SLOT_ID_INVALID,
            Self::UserAlreadyLoggedIn => ck::CKR_USER_ALREADY_LOGGED_IN,
            Self::UserNotLoggedIn => ck::CKR_USER_NOT_LOGGED_IN,
            Self::UserTypeInvalid => ck::CKR_USER_TYPE_INVALID,
        }
    }
}

impl From<Error> for ck::CK_RV {
    fn from(src: Error) -> ck::CK_RV {
        src.ck_rv()
    }
}

/// KMS client faults collapse into "device error": the remote device
/// failed. The distinction lives in the log record only.
impl From<kms_rpc::Error> for Error {
    fn from(src: kms_rpc::Error) -> Self {
        error!("KMS client error: {:?}", src);
        Error::DeviceError
    }
}

pub type Result<T> = std::result::Result<T, Error>;
