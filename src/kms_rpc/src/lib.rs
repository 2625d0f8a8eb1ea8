// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

extern crate serde;
extern crate serde_json;

pub mod api;
pub mod client;
pub mod transport;

pub use api::{
    Algorithm, ApiResult, AsymmetricDecryptRequest, AsymmetricDecryptResponse,
    AsymmetricSignRequest, AsymmetricSignResponse, CryptoKey, CryptoKeyVersion, Digest,
    DigestAlgorithm, Error, KeyPurpose, KeyRing, KeyVersionState, KmsClient, KmsRequest,
    KmsResponse, PublicKey, Result, RpcError, StatusCode,
};
pub use client::HttpKmsClient;
pub use transport::Error as TransportError;
pub use transport::{HttpTransport, Transport};
