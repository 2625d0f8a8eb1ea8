//! Subprocess harness contract: the server binary writes one `host:port`
//! line to stdout, serves the wire protocol on that address, and goes
//! away on SIGINT.

use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};

use kms_rpc::api::{
    Algorithm, AsymmetricSignRequest, Digest, DigestAlgorithm, KeyPurpose, KmsClient, KmsRequest,
    KmsResponse,
};
use kms_rpc::HttpKmsClient;
use p256::pkcs8::DecodePublicKey;
use sha2::{Digest as _, Sha256};
use signature::hazmat::PrehashVerifier;

#[test]
fn banner_wire_protocol_and_sigint() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_fake-kms"))
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();

    let mut line = String::new();
    BufReader::new(child.stdout.take().unwrap())
        .read_line(&mut line)
        .unwrap();
    let addr = line.trim().to_string();
    assert!(addr.starts_with("127.0.0.1:"), "bad banner: {:?}", line);

    let client = HttpKmsClient::connect(&addr).unwrap();

    // Admin surface, via raw calls.
    let ring = match client
        .call(&KmsRequest::CreateKeyRing {
            parent: "projects/harness/locations/global".to_string(),
            key_ring_id: "wire-ring".to_string(),
        })
        .unwrap()
    {
        KmsResponse::CreateKeyRing(Ok(kr)) => kr.name,
        other => panic!("unexpected response: {:?}", other),
    };
    let key = match client
        .call(&KmsRequest::CreateCryptoKey {
            parent: ring,
            crypto_key_id: "signer".to_string(),
            purpose: KeyPurpose::AsymmetricSign,
            algorithm: Algorithm::EcSignP256Sha256,
        })
        .unwrap()
    {
        KmsResponse::CreateCryptoKey(Ok(key)) => key.name,
        other => panic!("unexpected response: {:?}", other),
    };

    // Provider-facing surface, via the KmsClient facade.
    let versions = client.list_crypto_key_versions(&key).unwrap();
    assert_eq!(versions.len(), 1);
    let pk = client.get_public_key(&versions[0].name).unwrap();
    assert_eq!(crc32c::crc32c(pk.pem.as_bytes()), pk.pem_crc32c);

    let digest = Sha256::digest(b"over the wire").to_vec();
    let resp = client
        .asymmetric_sign(AsymmetricSignRequest {
            name: versions[0].name.clone(),
            digest: Some(Digest {
                algorithm: DigestAlgorithm::Sha256,
                bytes: digest.clone(),
            }),
            digest_crc32c: Some(crc32c::crc32c(&digest)),
            data: Vec::new(),
            data_crc32c: None,
        })
        .unwrap();
    assert!(resp.verified_digest_crc32c);
    assert_eq!(crc32c::crc32c(&resp.signature), resp.signature_crc32c);

    // The signature verifies against the PEM the server handed out.
    let verifying_key = p256::ecdsa::VerifyingKey::from(
        p256::PublicKey::from_public_key_pem(&pk.pem).unwrap(),
    );
    let sig = p256::ecdsa::Signature::from_der(&resp.signature).unwrap();
    verifying_key.verify_prehash(&digest, &sig).unwrap();

    // A second connection sees the same store.
    let client2 = HttpKmsClient::connect(&addr).unwrap();
    assert_eq!(client2.list_crypto_key_versions(&key).unwrap().len(), 1);

    // SIGINT is the shutdown contract.
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(child.id() as i32),
        nix::sys::signal::Signal::SIGINT,
    )
    .unwrap();
    let status = child.wait().unwrap();
    assert!(status.success());
}
