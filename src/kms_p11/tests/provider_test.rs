//! End-to-end provider tests against the in-process fake KMS. One
//! provider instance is shared by the whole test binary (initialize is
//! process-global); every test opens its own sessions.

use std::sync::{Arc, OnceLock};

use fake_kms::FakeKms;
use kms_p11::api;
use kms_p11::backend::attr::{Attribute, SearchTemplate};
use kms_p11::backend::mech::{MechDigest, Mechanism, OaepParams, PssParams};
use kms_p11::ck;
use kms_p11::config::Config;
use kms_p11::Error;
use kms_rpc::api::{Algorithm, KeyPurpose};
use sha2::{Digest, Sha256, Sha384};

const PARENT: &str = "projects/test/locations/global";

struct TestEnv {
    kms: Arc<FakeKms>,
    ring: String,
    refresh_ring: String,
}

const SLOT: ck::CK_SLOT_ID = 0;
/// Dedicated to the refresh test; its object handles churn.
const REFRESH_SLOT: ck::CK_SLOT_ID = 1;
/// Dedicated to the login test; its token-wide login state churns.
const LOGIN_SLOT: ck::CK_SLOT_ID = 2;

fn env() -> &'static TestEnv {
    static ENV: OnceLock<TestEnv> = OnceLock::new();
    ENV.get_or_init(|| {
        let kms = Arc::new(FakeKms::new());
        let ring = kms.create_key_ring(PARENT, "p11-ring").unwrap().name;
        for (id, purpose, algorithm) in [
            (
                "rsa-pss",
                KeyPurpose::AsymmetricSign,
                Algorithm::RsaSignPss2048Sha256,
            ),
            (
                "rsa-pkcs1",
                KeyPurpose::AsymmetricSign,
                Algorithm::RsaSignPkcs1_2048Sha256,
            ),
            (
                "rsa-raw",
                KeyPurpose::AsymmetricSign,
                Algorithm::RsaSignRawPkcs1_2048,
            ),
            (
                "ec-p256",
                KeyPurpose::AsymmetricSign,
                Algorithm::EcSignP256Sha256,
            ),
            (
                "ec-p384",
                KeyPurpose::AsymmetricSign,
                Algorithm::EcSignP384Sha384,
            ),
            (
                "rsa-oaep",
                KeyPurpose::AsymmetricDecrypt,
                Algorithm::RsaDecryptOaep2048Sha256,
            ),
            // Symmetric keys must be skipped during enumeration.
            (
                "aes",
                KeyPurpose::EncryptDecrypt,
                Algorithm::GoogleSymmetricEncryption,
            ),
        ] {
            kms.create_crypto_key(&ring, id, purpose, algorithm).unwrap();
        }

        let refresh_ring = kms.create_key_ring(PARENT, "refresh-ring").unwrap().name;
        kms.create_crypto_key(
            &refresh_ring,
            "ec-refresh",
            KeyPurpose::AsymmetricSign,
            Algorithm::EcSignP256Sha256,
        )
        .unwrap();

        let login_ring = kms.create_key_ring(PARENT, "login-ring").unwrap().name;
        kms.create_crypto_key(
            &login_ring,
            "ec-login",
            KeyPurpose::AsymmetricSign,
            Algorithm::EcSignP256Sha256,
        )
        .unwrap();

        let config = Config::from_yaml(&format!(
            "slots:\n  - key_ring: \"{}\"\n  - key_ring: \"{}\"\n  - key_ring: \"{}\"\n",
            ring, refresh_ring, login_ring
        ))
        .unwrap();
        api::initialize(&config, kms.clone()).unwrap();

        TestEnv {
            kms,
            ring,
            refresh_ring,
        }
    })
}

fn open_session() -> ck::CK_SESSION_HANDLE {
    env();
    api::open_session(SLOT, ck::CKF_SERIAL_SESSION).unwrap()
}

fn find_one(
    session: ck::CK_SESSION_HANDLE,
    label: &str,
    class: ck::CK_OBJECT_CLASS,
) -> ck::CK_OBJECT_HANDLE {
    let template = SearchTemplate::new()
        .with_ulong(ck::CKA_CLASS, class)
        .with_str(ck::CKA_LABEL, label);
    api::find_objects_init(session, &template).unwrap();
    let handles = api::find_objects(session, 16).unwrap();
    api::find_objects_final(session).unwrap();
    assert_eq!(handles.len(), 1, "expected exactly one {} object", label);
    handles[0]
}

fn pss_mech(digest: Option<MechDigest>) -> Mechanism {
    Mechanism::RsaPkcsPss(digest, PssParams::for_digest(MechDigest::Sha256))
}

#[test]
fn sign_sha256_rsa_pss_roundtrip() {
    let s = open_session();
    let private = find_one(s, "rsa-pss", ck::CKO_PRIVATE_KEY);
    let public = find_one(s, "rsa-pss", ck::CKO_PUBLIC_KEY);
    let mech = pss_mech(Some(MechDigest::Sha256));

    api::sign_init(s, &mech, private).unwrap();
    assert_eq!(api::sign(s, b"hello", None).unwrap(), 256);
    let mut sig = vec![0u8; 256];
    assert_eq!(api::sign(s, b"hello", Some(&mut sig)).unwrap(), 256);

    api::verify_init(s, &mech, public).unwrap();
    api::verify(s, b"hello", &sig).unwrap();

    api::verify_init(s, &mech, public).unwrap();
    assert_eq!(
        api::verify(s, b"goodbye", &sig),
        Err(Error::SignatureInvalid)
    );

    api::close_session(s).unwrap();
}

#[test]
fn multipart_sign_and_verify_rsa_pkcs1() {
    let s = open_session();
    let private = find_one(s, "rsa-pkcs1", ck::CKO_PRIVATE_KEY);
    let public = find_one(s, "rsa-pkcs1", ck::CKO_PUBLIC_KEY);
    let mech = Mechanism::RsaPkcs(Some(MechDigest::Sha256));

    api::sign_init(s, &mech, private).unwrap();
    api::sign_update(s, b"part one, ").unwrap();
    api::sign_update(s, b"part two").unwrap();
    let len = api::sign_final(s, None).unwrap();
    let mut sig = vec![0u8; len];
    api::sign_final(s, Some(&mut sig)).unwrap();

    api::verify_init(s, &mech, public).unwrap();
    api::verify_update(s, b"part one, part two").unwrap();
    api::verify_final(s, &sig).unwrap();

    // Update after Final: the operation is gone.
    assert_eq!(
        api::sign_update(s, b"more"),
        Err(Error::OperationNotInitialized)
    );

    api::close_session(s).unwrap();
}

#[test]
fn sign_predigested_ecdsa_p256() {
    let s = open_session();
    let private = find_one(s, "ec-p256", ck::CKO_PRIVATE_KEY);
    let public = find_one(s, "ec-p256", ck::CKO_PUBLIC_KEY);

    let digest = Sha256::digest(b"pre-digested message").to_vec();
    api::sign_init(s, &Mechanism::Ecdsa(None), private).unwrap();
    assert_eq!(api::sign(s, &digest, None).unwrap(), 64);
    let mut sig = vec![0u8; 64];
    api::sign(s, &digest, Some(&mut sig)).unwrap();

    // r and s parse and are in range (from_slice enforces both).
    p256::ecdsa::Signature::from_slice(&sig).unwrap();

    api::verify_init(s, &Mechanism::Ecdsa(None), public).unwrap();
    api::verify(s, &digest, &sig).unwrap();

    // The digesting variant accepts the original message.
    api::verify_init(s, &Mechanism::Ecdsa(Some(MechDigest::Sha256)), public).unwrap();
    api::verify(s, b"pre-digested message", &sig).unwrap();

    // Bad digest length is a data-length fault.
    api::sign_init(s, &Mechanism::Ecdsa(None), private).unwrap();
    assert_eq!(
        api::sign(s, &digest[..16], Some(&mut sig)),
        Err(Error::DataLenRange)
    );

    api::close_session(s).unwrap();
}

#[test]
fn ecdsa_p384_digesting_roundtrip() {
    let s = open_session();
    let private = find_one(s, "ec-p384", ck::CKO_PRIVATE_KEY);
    let public = find_one(s, "ec-p384", ck::CKO_PUBLIC_KEY);
    let mech = Mechanism::Ecdsa(Some(MechDigest::Sha384));

    api::sign_init(s, &mech, private).unwrap();
    let len = api::sign(s, b"p384 message", None).unwrap();
    assert_eq!(len, 96);
    let mut sig = vec![0u8; len];
    api::sign(s, b"p384 message", Some(&mut sig)).unwrap();

    api::verify_init(s, &mech, public).unwrap();
    api::verify(s, b"p384 message", &sig).unwrap();

    // Pre-digested verify agrees.
    let digest = Sha384::digest(b"p384 message").to_vec();
    api::verify_init(s, &Mechanism::Ecdsa(None), public).unwrap();
    api::verify(s, &digest, &sig).unwrap();

    api::close_session(s).unwrap();
}

#[test]
fn buffer_too_small_does_not_consume_the_operation() {
    let s = open_session();
    let private = find_one(s, "rsa-pss", ck::CKO_PRIVATE_KEY);
    let public = find_one(s, "rsa-pss", ck::CKO_PUBLIC_KEY);
    let mech = pss_mech(Some(MechDigest::Sha256));

    api::sign_init(s, &mech, private).unwrap();
    let mut tiny = [0u8; 1];
    assert_eq!(
        api::sign(s, b"data", Some(&mut tiny)),
        Err(Error::BufferTooSmall)
    );

    // The operation survives and still produces a good signature.
    let mut sig = vec![0u8; 256];
    assert_eq!(api::sign(s, b"data", Some(&mut sig)).unwrap(), 256);
    api::verify_init(s, &mech, public).unwrap();
    api::verify(s, b"data", &sig).unwrap();

    // It is now terminal.
    assert_eq!(
        api::sign(s, b"data", Some(&mut sig)),
        Err(Error::OperationNotInitialized)
    );

    api::close_session(s).unwrap();
}

#[test]
fn second_sign_init_reports_operation_active() {
    let s = open_session();
    let private = find_one(s, "rsa-pss", ck::CKO_PRIVATE_KEY);
    let public = find_one(s, "rsa-pss", ck::CKO_PUBLIC_KEY);
    let mech = pss_mech(Some(MechDigest::Sha256));

    api::sign_init(s, &mech, private).unwrap();
    assert_eq!(
        api::sign_init(s, &mech, private),
        Err(Error::OperationActive)
    );

    // The first operation is still live.
    let mut sig = vec![0u8; 256];
    api::sign(s, b"still fine", Some(&mut sig)).unwrap();
    api::verify_init(s, &mech, public).unwrap();
    api::verify(s, b"still fine", &sig).unwrap();

    api::close_session(s).unwrap();
}

#[test]
fn find_by_class_and_label() {
    let s = open_session();

    let template = SearchTemplate::new()
        .with_ulong(ck::CKA_CLASS, ck::CKO_PRIVATE_KEY)
        .with_str(ck::CKA_LABEL, "ec-p256");
    api::find_objects_init(s, &template).unwrap();
    let handles = api::find_objects(s, 16).unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(api::find_objects(s, 16).unwrap(), Vec::<ck::CK_OBJECT_HANDLE>::new());
    api::find_objects_final(s).unwrap();

    // The label reads back.
    let mut tpl = [Attribute::with_capacity(ck::CKA_LABEL, 32)];
    api::get_attribute_value(s, handles[0], &mut tpl).unwrap();
    assert_eq!(tpl[0].value_len, 7);
    assert_eq!(&tpl[0].value.as_ref().unwrap()[..7], b"ec-p256");

    // Find is permissible again after Final.
    api::find_objects_init(s, &template).unwrap();
    api::find_objects_final(s).unwrap();

    // Without Init, FindObjects is not initialized.
    assert_eq!(api::find_objects(s, 1), Err(Error::OperationNotInitialized));

    api::close_session(s).unwrap();
}

#[test]
fn find_enumerates_in_stable_order_and_skips_symmetric_keys() {
    let s = open_session();

    let everything = SearchTemplate::new();
    api::find_objects_init(s, &everything).unwrap();
    let first = api::find_objects(s, 1000).unwrap();
    api::find_objects_final(s).unwrap();

    // Two objects per asymmetric version; the symmetric key contributes
    // none.
    assert_eq!(first.len(), 12);
    assert!(first.iter().all(|&h| h != ck::CK_INVALID_HANDLE));
    let mut dedup = first.clone();
    dedup.sort_unstable();
    dedup.dedup();
    assert_eq!(dedup.len(), first.len());

    // Same snapshot, same order.
    api::find_objects_init(s, &everything).unwrap();
    let second = api::find_objects(s, 1000).unwrap();
    api::find_objects_final(s).unwrap();
    assert_eq!(first, second);

    // Chunked retrieval walks the same sequence.
    api::find_objects_init(s, &everything).unwrap();
    let mut chunked = Vec::new();
    loop {
        let chunk = api::find_objects(s, 5).unwrap();
        if chunk.is_empty() {
            break;
        }
        chunked.extend(chunk);
    }
    api::find_objects_final(s).unwrap();
    assert_eq!(first, chunked);

    api::close_session(s).unwrap();
}

#[test]
fn sensitive_attributes_are_unreadable() {
    let s = open_session();
    let private = find_one(s, "rsa-pss", ck::CKO_PRIVATE_KEY);

    let mut tpl = [Attribute::with_capacity(ck::CKA_PRIVATE_EXPONENT, 512)];
    assert_eq!(
        api::get_attribute_value(s, private, &mut tpl),
        Err(Error::AttributeSensitive)
    );
    assert_eq!(tpl[0].value_len, ck::CK_UNAVAILABLE_INFORMATION);
    assert!(tpl[0].value.as_ref().unwrap().iter().all(|&b| b == 0));

    // Sensitive attributes exclude objects from matching outright.
    let template = SearchTemplate::new().with_bytes(ck::CKA_PRIVATE_EXPONENT, &[]);
    api::find_objects_init(s, &template).unwrap();
    assert_eq!(api::find_objects(s, 16).unwrap(), Vec::<ck::CK_OBJECT_HANDLE>::new());
    api::find_objects_final(s).unwrap();

    api::close_session(s).unwrap();
}

#[test]
fn modulus_matches_the_kms_public_key() {
    use rsa::pkcs8::DecodePublicKey;
    use rsa::traits::PublicKeyParts;

    let env = env();
    let s = open_session();
    let public = find_one(s, "rsa-pss", ck::CKO_PUBLIC_KEY);

    let version = format!("{}/cryptoKeys/rsa-pss/cryptoKeyVersions/1", env.ring);
    let pem = env.kms.get_public_key(&version).unwrap().pem;
    let expected = rsa::RsaPublicKey::from_public_key_pem(&pem)
        .unwrap()
        .n()
        .to_bytes_be();

    let mut tpl = [Attribute::probe(ck::CKA_MODULUS)];
    api::get_attribute_value(s, public, &mut tpl).unwrap();
    assert_eq!(tpl[0].value_len as usize, expected.len());

    let mut tpl = [Attribute::with_capacity(ck::CKA_MODULUS, expected.len())];
    api::get_attribute_value(s, public, &mut tpl).unwrap();
    assert_eq!(tpl[0].value.as_ref().unwrap(), &expected);

    api::close_session(s).unwrap();
}

#[test]
fn oaep_encrypt_decrypt_roundtrip() {
    let s = open_session();
    let private = find_one(s, "rsa-oaep", ck::CKO_PRIVATE_KEY);
    let public = find_one(s, "rsa-oaep", ck::CKO_PUBLIC_KEY);
    let mech = Mechanism::RsaPkcsOaep(OaepParams::for_digest(MechDigest::Sha256));

    let plaintext = b"the quick brown fox";

    api::encrypt_init(s, &mech, public).unwrap();
    assert_eq!(api::encrypt(s, plaintext, None).unwrap(), 256);
    let mut ciphertext = vec![0u8; 256];
    api::encrypt(s, plaintext, Some(&mut ciphertext)).unwrap();

    api::decrypt_init(s, &mech, private).unwrap();
    // The probe reports the exact plaintext length, per the two-call
    // convention.
    let len = api::decrypt(s, &ciphertext, None).unwrap();
    assert_eq!(len, plaintext.len());
    let mut out = vec![0u8; len];
    assert_eq!(api::decrypt(s, &ciphertext, Some(&mut out)).unwrap(), len);
    assert_eq!(out, plaintext);

    // Truncated ciphertext is a length fault and consumes the operation.
    api::decrypt_init(s, &mech, private).unwrap();
    assert_eq!(
        api::decrypt(s, &ciphertext[..100], None),
        Err(Error::EncryptedDataLenRange)
    );

    api::close_session(s).unwrap();
}

#[test]
fn oaep_encrypt_rejects_oversized_plaintext() {
    let s = open_session();
    let public = find_one(s, "rsa-oaep", ck::CKO_PUBLIC_KEY);
    let mech = Mechanism::RsaPkcsOaep(OaepParams::for_digest(MechDigest::Sha256));

    // Max OAEP input for 2048/SHA-256 is 256 - 2*32 - 2 = 190 bytes.
    api::encrypt_init(s, &mech, public).unwrap();
    let mut out = vec![0u8; 256];
    assert_eq!(
        api::encrypt(s, &[0u8; 191], Some(&mut out)),
        Err(Error::DataLenRange)
    );

    api::close_session(s).unwrap();
}

#[test]
fn raw_pkcs1_signing_flows() {
    let s = open_session();
    let private = find_one(s, "rsa-raw", ck::CKO_PRIVATE_KEY);
    let public = find_one(s, "rsa-raw", ck::CKO_PUBLIC_KEY);

    // Arbitrary block, padded remotely.
    api::sign_init(s, &Mechanism::RsaPkcs(None), private).unwrap();
    let mut sig = vec![0u8; 256];
    api::sign(s, b"an arbitrary block", Some(&mut sig)).unwrap();
    api::verify_init(s, &Mechanism::RsaPkcs(None), public).unwrap();
    api::verify(s, b"an arbitrary block", &sig).unwrap();

    // The digesting variant over the same key builds the DigestInfo
    // envelope locally.
    let mech = Mechanism::RsaPkcs(Some(MechDigest::Sha256));
    api::sign_init(s, &mech, private).unwrap();
    api::sign_update(s, b"enveloped ").unwrap();
    api::sign_update(s, b"message").unwrap();
    api::sign_final(s, Some(&mut sig)).unwrap();
    api::verify_init(s, &mech, public).unwrap();
    api::verify(s, b"enveloped message", &sig).unwrap();

    // Oversized raw input is a data-length fault.
    api::sign_init(s, &Mechanism::RsaPkcs(None), private).unwrap();
    assert_eq!(
        api::sign(s, &[0u8; 246], Some(&mut sig)),
        Err(Error::DataLenRange)
    );

    api::close_session(s).unwrap();
}

#[test]
fn predigested_pkcs1_takes_a_digest_info_block() {
    let s = open_session();
    let private = find_one(s, "rsa-pkcs1", ck::CKO_PRIVATE_KEY);
    let public = find_one(s, "rsa-pkcs1", ck::CKO_PUBLIC_KEY);

    // DigestInfo(SHA-256) prefix followed by the digest.
    let digest = Sha256::digest(b"signed via DigestInfo");
    let mut block = vec![
        0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
        0x01, 0x05, 0x00, 0x04, 0x20,
    ];
    block.extend_from_slice(&digest);

    api::sign_init(s, &Mechanism::RsaPkcs(None), private).unwrap();
    let mut sig = vec![0u8; 256];
    api::sign(s, &block, Some(&mut sig)).unwrap();

    api::verify_init(s, &Mechanism::RsaPkcs(Some(MechDigest::Sha256)), public).unwrap();
    api::verify(s, b"signed via DigestInfo", &sig).unwrap();

    // A mangled envelope is rejected before any remote call.
    api::sign_init(s, &Mechanism::RsaPkcs(None), private).unwrap();
    assert_eq!(
        api::sign(s, &block[..block.len() - 1], Some(&mut sig)),
        Err(Error::DataInvalid)
    );

    api::close_session(s).unwrap();
}

#[test]
fn dispatch_rejects_mismatched_keys_and_params() {
    let s = open_session();
    let pss_private = find_one(s, "rsa-pss", ck::CKO_PRIVATE_KEY);
    let pss_public = find_one(s, "rsa-pss", ck::CKO_PUBLIC_KEY);
    let oaep_private = find_one(s, "rsa-oaep", ck::CKO_PRIVATE_KEY);

    // Signing with the public half.
    assert_eq!(
        api::sign_init(s, &pss_mech(Some(MechDigest::Sha256)), pss_public),
        Err(Error::KeyFunctionNotPermitted)
    );

    // EC mechanism against an RSA key.
    assert_eq!(
        api::sign_init(s, &Mechanism::Ecdsa(None), pss_private),
        Err(Error::KeyTypeInconsistent)
    );

    // Mechanism outside the algorithm's allowed set.
    assert_eq!(
        api::sign_init(s, &Mechanism::RsaPkcs(Some(MechDigest::Sha256)), pss_private),
        Err(Error::MechanismInvalid)
    );

    // Signing with a decrypt-purpose key.
    assert_eq!(
        api::sign_init(s, &pss_mech(Some(MechDigest::Sha256)), oaep_private),
        Err(Error::KeyFunctionNotPermitted)
    );

    // PSS parameter block with the wrong salt length.
    let bad_params = Mechanism::RsaPkcsPss(
        Some(MechDigest::Sha256),
        PssParams {
            hash_alg: ck::CKM_SHA256,
            mgf: ck::CKG_MGF1_SHA256,
            salt_len: 20,
        },
    );
    assert_eq!(
        api::sign_init(s, &bad_params, pss_private),
        Err(Error::MechanismParamInvalid)
    );

    // PSS parameter block with a mismatched MGF digest.
    let bad_mgf = Mechanism::RsaPkcsPss(
        Some(MechDigest::Sha256),
        PssParams {
            hash_alg: ck::CKM_SHA256,
            mgf: ck::CKG_MGF1_SHA1,
            salt_len: 32,
        },
    );
    assert_eq!(
        api::sign_init(s, &bad_mgf, pss_private),
        Err(Error::MechanismParamInvalid)
    );

    // Stale handle.
    assert_eq!(
        api::sign_init(s, &pss_mech(Some(MechDigest::Sha256)), 0),
        Err(Error::KeyHandleInvalid)
    );

    api::close_session(s).unwrap();
}

#[test]
fn digest_two_call_convention() {
    let s = open_session();
    let mech = Mechanism::Digest(MechDigest::Sha256);

    api::digest_init(s, &mech).unwrap();
    let len = api::digest(s, b"abc", None).unwrap();
    assert_eq!(len, 32);
    let mut out = vec![0u8; len];
    assert_eq!(api::digest(s, b"abc", Some(&mut out)).unwrap(), len);
    assert_eq!(out, Sha256::digest(b"abc").to_vec());

    // Multi-part agrees with single-shot.
    api::digest_init(s, &mech).unwrap();
    api::digest_update(s, b"ab").unwrap();
    api::digest_update(s, b"c").unwrap();
    let mut out2 = vec![0u8; 32];
    api::digest_final(s, Some(&mut out2)).unwrap();
    assert_eq!(out, out2);

    // A non-digest mechanism is rejected.
    assert_eq!(
        api::digest_init(s, &Mechanism::RsaPkcs(None)),
        Err(Error::MechanismInvalid)
    );

    api::close_session(s).unwrap();
}

#[test]
fn mechanism_list_is_idempotent() {
    env();
    let first = api::get_mechanism_list(SLOT).unwrap();
    let second = api::get_mechanism_list(SLOT).unwrap();
    assert_eq!(first, second);
    assert!(first.contains(&ck::CKM_ECDSA));
    assert!(first.contains(&ck::CKM_RSA_PKCS_OAEP));

    let info = api::get_mechanism_info(SLOT, ck::CKM_SHA256_RSA_PKCS_PSS).unwrap();
    assert_eq!(info.flags & ck::CKF_SIGN, ck::CKF_SIGN);
    assert_eq!(
        api::get_mechanism_info(SLOT, ck::CKM_RSA_X_509),
        Err(Error::MechanismInvalid)
    );
}

#[test]
fn token_and_slot_info_report_the_ring() {
    env();
    let slots = api::get_slot_list(true).unwrap();
    assert_eq!(slots, vec![0, 1, 2]);

    let slot_info = api::get_slot_info(SLOT).unwrap();
    assert_eq!(
        slot_info.flags & ck::CKF_TOKEN_PRESENT,
        ck::CKF_TOKEN_PRESENT
    );

    let token_info = api::get_token_info(SLOT).unwrap();
    assert!(token_info.label.starts_with(b"p11-ring"));
    assert_eq!(
        token_info.flags & ck::CKF_WRITE_PROTECTED,
        ck::CKF_WRITE_PROTECTED
    );

    assert_eq!(api::get_slot_info(99), Err(Error::SlotIdInvalid));
}

#[test]
fn closed_sessions_stop_resolving() {
    let s = open_session();
    let private = find_one(s, "rsa-pss", ck::CKO_PRIVATE_KEY);
    api::sign_init(s, &pss_mech(Some(MechDigest::Sha256)), private).unwrap();

    api::close_session(s).unwrap();
    assert_eq!(
        api::sign(s, b"x", None),
        Err(Error::SessionHandleInvalid)
    );
    assert_eq!(api::close_session(s), Err(Error::SessionHandleInvalid));

    // Fresh sessions are unaffected by the dropped operation.
    let s2 = open_session();
    api::sign_init(s2, &pss_mech(Some(MechDigest::Sha256)), private).unwrap();
    let mut sig = vec![0u8; 256];
    api::sign(s2, b"x", Some(&mut sig)).unwrap();
    api::close_session(s2).unwrap();
}

#[test]
fn random_functions() {
    let s = open_session();

    let mut a = [0u8; 32];
    let mut b = [0u8; 32];
    api::generate_random(s, &mut a).unwrap();
    api::generate_random(s, &mut b).unwrap();
    assert_ne!(a, b);

    assert_eq!(
        api::seed_random(s, b"seed material"),
        Err(Error::RandomSeedNotSupported)
    );

    api::close_session(s).unwrap();
}

#[test]
fn get_object_size_is_unavailable() {
    let s = open_session();
    let public = find_one(s, "ec-p256", ck::CKO_PUBLIC_KEY);
    assert_eq!(
        api::get_object_size(s, public).unwrap(),
        ck::CK_UNAVAILABLE_INFORMATION
    );
    assert_eq!(api::get_object_size(s, 0), Err(Error::ObjectHandleInvalid));
    api::close_session(s).unwrap();
}

#[test]
fn login_matrix_and_session_states() {
    env();
    let ro = api::open_session(LOGIN_SLOT, ck::CKF_SERIAL_SESSION).unwrap();
    let rw =
        api::open_session(LOGIN_SLOT, ck::CKF_SERIAL_SESSION | ck::CKF_RW_SESSION).unwrap();

    // Parallel sessions are refused outright.
    assert_eq!(
        api::open_session(LOGIN_SLOT, 0),
        Err(Error::SessionParallelNotSupported)
    );

    assert_eq!(
        api::get_session_info(ro).unwrap().state,
        ck::CKS_RO_PUBLIC_SESSION
    );
    assert_eq!(
        api::get_session_info(rw).unwrap().state,
        ck::CKS_RW_PUBLIC_SESSION
    );

    // SO login is refused while a read-only session exists.
    assert_eq!(
        api::login(rw, ck::CKU_SO, b"0000"),
        Err(Error::SessionReadOnlyExists)
    );

    // User login flips every session on the token.
    api::login(ro, ck::CKU_USER, b"whatever").unwrap();
    assert_eq!(
        api::get_session_info(ro).unwrap().state,
        ck::CKS_RO_USER_FUNCTIONS
    );
    assert_eq!(
        api::get_session_info(rw).unwrap().state,
        ck::CKS_RW_USER_FUNCTIONS
    );
    assert_eq!(
        api::login(rw, ck::CKU_USER, b"again"),
        Err(Error::UserAlreadyLoggedIn)
    );
    api::logout(ro).unwrap();
    assert_eq!(api::logout(ro), Err(Error::UserNotLoggedIn));

    // With only the RW session left, SO login succeeds and blocks new
    // read-only sessions.
    api::close_session(ro).unwrap();
    api::login(rw, ck::CKU_SO, b"0000").unwrap();
    assert_eq!(
        api::get_session_info(rw).unwrap().state,
        ck::CKS_RW_SO_FUNCTIONS
    );
    assert_eq!(
        api::open_session(LOGIN_SLOT, ck::CKF_SERIAL_SESSION),
        Err(Error::SessionReadWriteSoExists)
    );
    api::logout(rw).unwrap();
    api::close_session(rw).unwrap();

    assert_eq!(api::login(99, ck::CKU_USER, b""), Err(Error::SessionHandleInvalid));

    // CloseAllSessions drops everything on the slot at once.
    let a = api::open_session(LOGIN_SLOT, ck::CKF_SERIAL_SESSION).unwrap();
    let b = api::open_session(LOGIN_SLOT, ck::CKF_SERIAL_SESSION).unwrap();
    api::close_all_sessions(LOGIN_SLOT).unwrap();
    assert_eq!(
        api::get_session_info(a).err(),
        Some(Error::SessionHandleInvalid)
    );
    assert_eq!(
        api::get_session_info(b).err(),
        Some(Error::SessionHandleInvalid)
    );
    assert_eq!(api::close_all_sessions(42), Err(Error::SlotIdInvalid));
}

#[test]
fn refresh_swaps_the_object_set() {
    let env = env();
    let s = api::open_session(REFRESH_SLOT, ck::CKF_SERIAL_SESSION).unwrap();

    let template = SearchTemplate::new()
        .with_ulong(ck::CKA_CLASS, ck::CKO_PRIVATE_KEY)
        .with_str(ck::CKA_LABEL, "ec-refresh");
    api::find_objects_init(s, &template).unwrap();
    let old = api::find_objects(s, 4).unwrap();
    api::find_objects_final(s).unwrap();
    assert_eq!(old.len(), 1);

    // Grow the ring, then refresh.
    env.kms
        .create_crypto_key(
            &env.refresh_ring,
            "ec-refresh-2",
            KeyPurpose::AsymmetricSign,
            Algorithm::EcSignP256Sha256,
        )
        .unwrap();
    api::refresh_token(REFRESH_SLOT).unwrap();

    // Old handles die with the old snapshot; the new set is visible and
    // usable.
    let mut tpl = [Attribute::probe(ck::CKA_LABEL)];
    assert_eq!(
        api::get_attribute_value(s, old[0], &mut tpl),
        Err(Error::ObjectHandleInvalid)
    );

    api::find_objects_init(s, &SearchTemplate::new()).unwrap();
    let all = api::find_objects(s, 100).unwrap();
    api::find_objects_final(s).unwrap();
    assert_eq!(all.len(), 4);
    assert!(!all.contains(&old[0]));

    let private = find_one_in(s, "ec-refresh-2");
    api::sign_init(s, &Mechanism::Ecdsa(Some(MechDigest::Sha256)), private).unwrap();
    let mut sig = vec![0u8; 64];
    api::sign(s, b"after refresh", Some(&mut sig)).unwrap();

    // Disabled versions drop out on the next refresh.
    env.kms
        .set_version_state(
            &format!(
                "{}/cryptoKeys/ec-refresh/cryptoKeyVersions/1",
                env.refresh_ring
            ),
            kms_rpc::api::KeyVersionState::Disabled,
        )
        .unwrap();
    api::refresh_token(REFRESH_SLOT).unwrap();
    api::find_objects_init(s, &SearchTemplate::new()).unwrap();
    assert_eq!(api::find_objects(s, 100).unwrap().len(), 2);
    api::find_objects_final(s).unwrap();

    api::close_session(s).unwrap();
}

fn find_one_in(session: ck::CK_SESSION_HANDLE, label: &str) -> ck::CK_OBJECT_HANDLE {
    let template = SearchTemplate::new()
        .with_ulong(ck::CKA_CLASS, ck::CKO_PRIVATE_KEY)
        .with_str(ck::CKA_LABEL, label);
    api::find_objects_init(session, &template).unwrap();
    let handles = api::find_objects(session, 4).unwrap();
    api::find_objects_final(session).unwrap();
    assert_eq!(handles.len(), 1);
    handles[0]
}

#[test]
fn initialize_twice_is_rejected() {
    let env = env();
    let config = Config::from_yaml(&format!("slots:\n  - key_ring: \"{}\"\n", env.ring)).unwrap();
    assert_eq!(
        api::initialize(&config, env.kms.clone()),
        Err(Error::CryptokiAlreadyInitialized)
    );
}

#[test]
fn allowed_mechanisms_attribute_is_count_prefixed() {
    let s = open_session();
    let public = find_one(s, "ec-p256", ck::CKO_PUBLIC_KEY);

    let mut tpl = [Attribute::with_capacity(ck::CKA_ALLOWED_MECHANISMS, 64)];
    api::get_attribute_value(s, public, &mut tpl).unwrap();
    // CKM_ECDSA and CKM_ECDSA_SHA256, behind an element count.
    assert_eq!(tpl[0].value_len, 24);
    let bytes = tpl[0].value.as_ref().unwrap();
    assert_eq!(&bytes[..8], &2u64.to_ne_bytes());

    api::close_session(s).unwrap();
}
