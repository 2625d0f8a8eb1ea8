// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use kms_rpc::api::{KmsRequest, KmsResponse};
use kms_rpc::transport::{HttpTransport, Transport};

use super::FakeKms;

/// Map one decoded request onto the store.
pub fn dispatch(kms: &FakeKms, req: KmsRequest) -> KmsResponse {
    match req {
        KmsRequest::ListKeyRings { parent } => {
            KmsResponse::ListKeyRings(kms.list_key_rings(&parent))
        }
        KmsRequest::CreateKeyRing {
            parent,
            key_ring_id,
        } => KmsResponse::CreateKeyRing(kms.create_key_ring(&parent, &key_ring_id)),
        KmsRequest::ListCryptoKeys { parent } => {
            KmsResponse::ListCryptoKeys(kms.list_crypto_keys(&parent))
        }
        KmsRequest::CreateCryptoKey {
            parent,
            crypto_key_id,
            purpose,
            algorithm,
        } => KmsResponse::CreateCryptoKey(kms.create_crypto_key(
            &parent,
            &crypto_key_id,
            purpose,
            algorithm,
        )),
        KmsRequest::ListCryptoKeyVersions { parent } => {
            KmsResponse::ListCryptoKeyVersions(kms.list_crypto_key_versions(&parent))
        }
        KmsRequest::GetPublicKey { name } => KmsResponse::GetPublicKey(kms.get_public_key(&name)),
        KmsRequest::AsymmetricSign(req) => KmsResponse::AsymmetricSign(kms.asymmetric_sign(&req)),
        KmsRequest::AsymmetricDecrypt(req) => {
            KmsResponse::AsymmetricDecrypt(kms.asymmetric_decrypt(&req))
        }
    }
}

fn handle_connection(kms: Arc<FakeKms>, stream: TcpStream) {
    let mut xport = HttpTransport::new(stream, HttpTransport::<TcpStream>::DEFAULT_URL);
    loop {
        let req = match xport.recv_request() {
            Ok(req) => req,
            // EOF or a framing error; either way the conversation is over.
            Err(_) => break,
        };
        let resp = dispatch(&kms, req);
        if let Err(e) = xport.send_response(&resp) {
            error!("failed to send response: {:?}", e);
            break;
        }
    }
}

/// Accept loop: one thread per client connection, requests served
/// sequentially per connection.
pub fn serve(kms: Arc<FakeKms>, listener: TcpListener) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let kms = kms.clone();
                thread::spawn(move || handle_connection(kms, stream));
            }
            Err(e) => error!("accept failed: {:?}", e),
        }
    }
}
