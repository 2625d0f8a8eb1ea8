// Copyright 2020-2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Hand-written subset of the Cryptoki v2.40 definitions the core needs.
//!
//! The core is ABI-free: these are plain Rust types mirroring the standard's
//! names and values, not a bindgen of the reference headers. `CK_ULONG` is
//! fixed to 64 bits once and for all (the LP64 convention every supported
//! target uses); all attribute encodings derive from that choice.

#![allow(non_camel_case_types)]

pub type CK_BYTE = u8;
pub type CK_BBOOL = u8;
pub type CK_ULONG = u64;
pub type CK_RV = CK_ULONG;
pub type CK_FLAGS = CK_ULONG;
pub type CK_SLOT_ID = CK_ULONG;
pub type CK_SESSION_HANDLE = CK_ULONG;
pub type CK_OBJECT_HANDLE = CK_ULONG;
pub type CK_OBJECT_CLASS = CK_ULONG;
pub type CK_KEY_TYPE = CK_ULONG;
pub type CK_ATTRIBUTE_TYPE = CK_ULONG;
pub type CK_MECHANISM_TYPE = CK_ULONG;
pub type CK_RSA_PKCS_MGF_TYPE = CK_ULONG;
pub type CK_STATE = CK_ULONG;
pub type CK_USER_TYPE = CK_ULONG;

pub const CK_TRUE: CK_BBOOL = 1;
pub const CK_FALSE: CK_BBOOL = 0;

pub const CK_INVALID_HANDLE: CK_ULONG = 0;
pub const CK_UNAVAILABLE_INFORMATION: CK_ULONG = !0;
pub const CK_EFFECTIVELY_INFINITE: CK_ULONG = 0;

// Object classes
pub const CKO_DATA: CK_OBJECT_CLASS = 0x0000;
pub const CKO_CERTIFICATE: CK_OBJECT_CLASS = 0x0001;
pub const CKO_PUBLIC_KEY: CK_OBJECT_CLASS = 0x0002;
pub const CKO_PRIVATE_KEY: CK_OBJECT_CLASS = 0x0003;
pub const CKO_SECRET_KEY: CK_OBJECT_CLASS = 0x0004;

// Key types
pub const CKK_RSA: CK_KEY_TYPE = 0x0000;
pub const CKK_EC: CK_KEY_TYPE = 0x0003;

// Users
pub const CKU_SO: CK_USER_TYPE = 0;
pub const CKU_USER: CK_USER_TYPE = 1;
pub const CKU_CONTEXT_SPECIFIC: CK_USER_TYPE = 2;

// Session states
pub const CKS_RO_PUBLIC_SESSION: CK_STATE = 0;
pub const CKS_RO_USER_FUNCTIONS: CK_STATE = 1;
pub const CKS_RW_PUBLIC_SESSION: CK_STATE = 2;
pub const CKS_RW_USER_FUNCTIONS: CK_STATE = 3;
pub const CKS_RW_SO_FUNCTIONS: CK_STATE = 4;

// Attribute types
pub const CKA_CLASS: CK_ATTRIBUTE_TYPE = 0x0000;
pub const CKA_TOKEN: CK_ATTRIBUTE_TYPE = 0x0001;
pub const CKA_PRIVATE: CK_ATTRIBUTE_TYPE = 0x0002;
pub const CKA_LABEL: CK_ATTRIBUTE_TYPE = 0x0003;
pub const CKA_VALUE: CK_ATTRIBUTE_TYPE = 0x0011;
pub const CKA_TRUSTED: CK_ATTRIBUTE_TYPE = 0x0086;
pub const CKA_KEY_TYPE: CK_ATTRIBUTE_TYPE = 0x0100;
pub const CKA_SUBJECT: CK_ATTRIBUTE_TYPE = 0x0101;
pub const CKA_ID: CK_ATTRIBUTE_TYPE = 0x0102;
pub const CKA_SENSITIVE: CK_ATTRIBUTE_TYPE = 0x0103;
pub const CKA_ENCRYPT: CK_ATTRIBUTE_TYPE = 0x0104;
pub const CKA_DECRYPT: CK_ATTRIBUTE_TYPE = 0x0105;
pub const CKA_WRAP: CK_ATTRIBUTE_TYPE = 0x0106;
pub const CKA_UNWRAP: CK_ATTRIBUTE_TYPE = 0x0107;
pub const CKA_SIGN: CK_ATTRIBUTE_TYPE = 0x0108;
pub const CKA_SIGN_RECOVER: CK_ATTRIBUTE_TYPE = 0x0109;
pub const CKA_VERIFY: CK_ATTRIBUTE_TYPE = 0x010a;
pub const CKA_VERIFY_RECOVER: CK_ATTRIBUTE_TYPE = 0x010b;
pub const CKA_DERIVE: CK_ATTRIBUTE_TYPE = 0x010c;
pub const CKA_START_DATE: CK_ATTRIBUTE_TYPE = 0x0110;
pub const CKA_END_DATE: CK_ATTRIBUTE_TYPE = 0x0111;
pub const CKA_MODULUS: CK_ATTRIBUTE_TYPE = 0x0120;
pub const CKA_MODULUS_BITS: CK_ATTRIBUTE_TYPE = 0x0121;
pub const CKA_PUBLIC_EXPONENT: CK_ATTRIBUTE_TYPE = 0x0122;
pub const CKA_PRIVATE_EXPONENT: CK_ATTRIBUTE_TYPE = 0x0123;
pub const CKA_PRIME_1: CK_ATTRIBUTE_TYPE = 0x0124;
pub const CKA_PRIME_2: CK_ATTRIBUTE_TYPE = 0x0125;
pub const CKA_EXPONENT_1: CK_ATTRIBUTE_TYPE = 0x0126;
pub const CKA_EXPONENT_2: CK_ATTRIBUTE_TYPE = 0x0127;
pub const CKA_COEFFICIENT: CK_ATTRIBUTE_TYPE = 0x0128;
pub const CKA_PUBLIC_KEY_INFO: CK_ATTRIBUTE_TYPE = 0x0129;
pub const CKA_EXTRACTABLE: CK_ATTRIBUTE_TYPE = 0x0162;
pub const CKA_LOCAL: CK_ATTRIBUTE_TYPE = 0x0163;
pub const CKA_NEVER_EXTRACTABLE: CK_ATTRIBUTE_TYPE = 0x0164;
pub const CKA_ALWAYS_SENSITIVE: CK_ATTRIBUTE_TYPE = 0x0165;
pub const CKA_KEY_GEN_MECHANISM: CK_ATTRIBUTE_TYPE = 0x0166;
pub const CKA_MODIFIABLE: CK_ATTRIBUTE_TYPE = 0x0170;
pub const CKA_COPYABLE: CK_ATTRIBUTE_TYPE = 0x0171;
pub const CKA_DESTROYABLE: CK_ATTRIBUTE_TYPE = 0x0172;
pub const CKA_EC_PARAMS: CK_ATTRIBUTE_TYPE = 0x0180;
pub const CKA_EC_POINT: CK_ATTRIBUTE_TYPE = 0x0181;
pub const CKA_ALWAYS_AUTHENTICATE: CK_ATTRIBUTE_TYPE = 0x0202;
pub const CKA_WRAP_WITH_TRUSTED: CK_ATTRIBUTE_TYPE = 0x0210;
pub const CKA_WRAP_TEMPLATE: CK_ATTRIBUTE_TYPE = 0x4000_0211;
pub const CKA_UNWRAP_TEMPLATE: CK_ATTRIBUTE_TYPE = 0x4000_0212;
pub const CKA_ALLOWED_MECHANISMS: CK_ATTRIBUTE_TYPE = 0x4000_0600;

// Mechanism types
pub const CKM_RSA_PKCS_KEY_PAIR_GEN: CK_MECHANISM_TYPE = 0x0000;
pub const CKM_RSA_PKCS: CK_MECHANISM_TYPE = 0x0001;
pub const CKM_RSA_X_509: CK_MECHANISM_TYPE = 0x0003;
pub const CKM_SHA1_RSA_PKCS: CK_MECHANISM_TYPE = 0x0006;
pub const CKM_RSA_PKCS_OAEP: CK_MECHANISM_TYPE = 0x0009;
pub const CKM_RSA_PKCS_PSS: CK_MECHANISM_TYPE = 0x000d;
pub const CKM_SHA1_RSA_PKCS_PSS: CK_MECHANISM_TYPE = 0x000e;
pub const CKM_SHA256_RSA_PKCS: CK_MECHANISM_TYPE = 0x0040;
pub const CKM_SHA384_RSA_PKCS: CK_MECHANISM_TYPE = 0x0041;
pub const CKM_SHA512_RSA_PKCS: CK_MECHANISM_TYPE = 0x0042;
pub const CKM_SHA256_RSA_PKCS_PSS: CK_MECHANISM_TYPE = 0x0043;
pub const CKM_SHA384_RSA_PKCS_PSS: CK_MECHANISM_TYPE = 0x0044;
pub const CKM_SHA512_RSA_PKCS_PSS: CK_MECHANISM_TYPE = 0x0045;
pub const CKM_SHA224_RSA_PKCS: CK_MECHANISM_TYPE = 0x0046;
pub const CKM_SHA224_RSA_PKCS_PSS: CK_MECHANISM_TYPE = 0x0047;
pub const CKM_SHA_1: CK_MECHANISM_TYPE = 0x0220;
pub const CKM_SHA256: CK_MECHANISM_TYPE = 0x0250;
pub const CKM_SHA224: CK_MECHANISM_TYPE = 0x0255;
pub const CKM_SHA384: CK_MECHANISM_TYPE = 0x0260;
pub const CKM_SHA512: CK_MECHANISM_TYPE = 0x0270;
pub const CKM_EC_KEY_PAIR_GEN: CK_MECHANISM_TYPE = 0x1040;
pub const CKM_ECDSA: CK_MECHANISM_TYPE = 0x1041;
pub const CKM_ECDSA_SHA1: CK_MECHANISM_TYPE = 0x1042;
pub const CKM_ECDSA_SHA224: CK_MECHANISM_TYPE = 0x1043;
pub const CKM_ECDSA_SHA256: CK_MECHANISM_TYPE = 0x1044;
pub const CKM_ECDSA_SHA384: CK_MECHANISM_TYPE = 0x1045;
pub const CKM_ECDSA_SHA512: CK_MECHANISM_TYPE = 0x1046;

// MGFs
pub const CKG_MGF1_SHA1: CK_RSA_PKCS_MGF_TYPE = 0x0001;
pub const CKG_MGF1_SHA256: CK_RSA_PKCS_MGF_TYPE = 0x0002;
pub const CKG_MGF1_SHA384: CK_RSA_PKCS_MGF_TYPE = 0x0003;
pub const CKG_MGF1_SHA512: CK_RSA_PKCS_MGF_TYPE = 0x0004;
pub const CKG_MGF1_SHA224: CK_RSA_PKCS_MGF_TYPE = 0x0005;

// Slot / token flags
pub const CKF_TOKEN_PRESENT: CK_FLAGS = 0x0001;
pub const CKF_RNG: CK_FLAGS = 0x0001;
pub const CKF_WRITE_PROTECTED: CK_FLAGS = 0x0002;
pub const CKF_LOGIN_REQUIRED: CK_FLAGS = 0x0004;
pub const CKF_USER_PIN_INITIALIZED: CK_FLAGS = 0x0008;
pub const CKF_TOKEN_INITIALIZED: CK_FLAGS = 0x0400;

// Session flags
pub const CKF_RW_SESSION: CK_FLAGS = 0x0002;
pub const CKF_SERIAL_SESSION: CK_FLAGS = 0x0004;

// Mechanism flags
pub const CKF_HW: CK_FLAGS = 0x0000_0001;
pub const CKF_ENCRYPT: CK_FLAGS = 0x0000_0100;
pub const CKF_DECRYPT: CK_FLAGS = 0x0000_0200;
pub const CKF_DIGEST: CK_FLAGS = 0x0000_0400;
pub const CKF_SIGN: CK_FLAGS = 0x0000_0800;
pub const CKF_VERIFY: CK_FLAGS = 0x0000_2000;
pub const CKF_EC_F_P: CK_FLAGS = 0x0010_0000;
pub const CKF_EC_NAMEDCURVE: CK_FLAGS = 0x0080_0000;
pub const CKF_EC_UNCOMPRESS: CK_FLAGS = 0x0200_0000;

// Return values
pub const CKR_OK: CK_RV = 0x0000;
pub const CKR_HOST_MEMORY: CK_RV = 0x0002;
pub const CKR_SLOT_ID_INVALID: CK_RV = 0x0003;
pub const CKR_GENERAL_ERROR: CK_RV = 0x0005;
pub const CKR_FUNCTION_FAILED: CK_RV = 0x0006;
pub const CKR_ARGUMENTS_BAD: CK_RV = 0x0007;
pub const CKR_ATTRIBUTE_SENSITIVE: CK_RV = 0x0011;
pub const CKR_ATTRIBUTE_TYPE_INVALID: CK_RV = 0x0012;
pub const CKR_ATTRIBUTE_VALUE_INVALID: CK_RV = 0x0013;
pub const CKR_DATA_INVALID: CK_RV = 0x0020;
pub const CKR_DATA_LEN_RANGE: CK_RV = 0x0021;
pub const CKR_DEVICE_ERROR: CK_RV = 0x0030;
pub const CKR_DEVICE_REMOVED: CK_RV = 0x0032;
pub const CKR_ENCRYPTED_DATA_INVALID: CK_RV = 0x0040;
pub const CKR_ENCRYPTED_DATA_LEN_RANGE: CK_RV = 0x0041;
pub const CKR_FUNCTION_NOT_SUPPORTED: CK_RV = 0x0054;
pub const CKR_KEY_HANDLE_INVALID: CK_RV = 0x0060;
pub const CKR_KEY_TYPE_INCONSISTENT: CK_RV = 0x0063;
pub const CKR_KEY_FUNCTION_NOT_PERMITTED: CK_RV = 0x0068;
pub const CKR_MECHANISM_INVALID: CK_RV = 0x0070;
pub const CKR_MECHANISM_PARAM_INVALID: CK_RV = 0x0071;
pub const CKR_OBJECT_HANDLE_INVALID: CK_RV = 0x0082;
pub const CKR_OPERATION_ACTIVE: CK_RV = 0x0090;
pub const CKR_OPERATION_NOT_INITIALIZED: CK_RV = 0x0091;
pub const CKR_RANDOM_SEED_NOT_SUPPORTED: CK_RV = 0x0120;
pub const CKR_SESSION_HANDLE_INVALID: CK_RV = 0x00b3;
pub const CKR_SESSION_PARALLEL_NOT_SUPPORTED: CK_RV = 0x00b4;
pub const CKR_SESSION_READ_ONLY_EXISTS: CK_RV = 0x00b7;
pub const CKR_SESSION_READ_WRITE_SO_EXISTS: CK_RV = 0x00b8;
pub const CKR_SIGNATURE_INVALID: CK_RV = 0x00c0;
pub const CKR_SIGNATURE_LEN_RANGE: CK_RV = 0x00c1;
pub const CKR_USER_ALREADY_LOGGED_IN: CK_RV = 0x0100;
pub const CKR_USER_NOT_LOGGED_IN: CK_RV = 0x0101;
pub const CKR_USER_TYPE_INVALID: CK_RV = 0x0103;
pub const CKR_BUFFER_TOO_SMALL: CK_RV = 0x0150;
pub const CKR_CRYPTOKI_NOT_INITIALIZED: CK_RV = 0x0190;
pub const CKR_CRYPTOKI_ALREADY_INITIALIZED: CK_RV = 0x0191;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CK_VERSION {
    pub major: CK_BYTE,
    pub minor: CK_BYTE,
}

#[derive(Clone, Copy, Debug)]
pub struct CK_INFO {
    pub cryptoki_version: CK_VERSION,
    pub manufacturer_id: [u8; 32],
    pub flags: CK_FLAGS,
    pub library_description: [u8; 32],
    pub library_version: CK_VERSION,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CK_SLOT_INFO {
    pub slot_description: [u8; 64],
    pub manufacturer_id: [u8; 32],
    pub flags: CK_FLAGS,
    pub hardware_version: CK_VERSION,
    pub firmware_version: CK_VERSION,
}

#[derive(Clone, Copy, Debug)]
pub struct CK_TOKEN_INFO {
    pub label: [u8; 32],
    pub manufacturer_id: [u8; 32],
    pub model: [u8; 16],
    pub serial_number: [u8; 16],
    pub flags: CK_FLAGS,
    pub max_session_count: CK_ULONG,
    pub session_count: CK_ULONG,
    pub max_rw_session_count: CK_ULONG,
    pub rw_session_count: CK_ULONG,
    pub max_pin_len: CK_ULONG,
    pub min_pin_len: CK_ULONG,
    pub total_public_memory: CK_ULONG,
    pub free_public_memory: CK_ULONG,
    pub total_private_memory: CK_ULONG,
    pub free_private_memory: CK_ULONG,
    pub hardware_version: CK_VERSION,
    pub firmware_version: CK_VERSION,
    pub utc_time: [u8; 16],
}

#[derive(Clone, Copy, Debug)]
pub struct CK_SESSION_INFO {
    pub slot_id: CK_SLOT_ID,
    pub state: CK_STATE,
    pub flags: CK_FLAGS,
    pub device_error: CK_ULONG,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CK_MECHANISM_INFO {
    pub min_key_size: CK_ULONG,
    pub max_key_size: CK_ULONG,
    pub flags: CK_FLAGS,
}
