// Copyright 2020-2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory stand-in for the remote KMS.
//!
//! The store holds key rings, crypto keys and key versions addressed by
//! their full resource names, generates real key material at key creation
//! time, and performs real signing / decryption over it, so end-to-end
//! tests are deterministic and hermetic. It can be used in-process (it
//! implements `kms_rpc::KmsClient` directly) or served over loopback TCP
//! by the `fake-kms` binary.

#[macro_use]
extern crate log;

mod store;

pub mod server;

pub use store::FakeKms;
