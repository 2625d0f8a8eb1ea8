//! Provider lifecycle: not-initialized / already-initialized enforcement,
//! failed initialization, teardown on finalize. Sequenced in one test
//! body because the provider singleton is process-global.

use std::sync::Arc;

use fake_kms::FakeKms;
use kms_p11::api;
use kms_p11::ck;
use kms_p11::config::Config;
use kms_p11::Error;
use kms_rpc::api::{
    Algorithm, AsymmetricDecryptRequest, AsymmetricDecryptResponse, AsymmetricSignRequest,
    AsymmetricSignResponse, CryptoKey, CryptoKeyVersion, KeyPurpose, KmsClient, PublicKey,
    Result as ClientResult,
};

/// Delegates to the fake but corrupts the public-key checksum, so slot
/// enumeration must fail with a device error.
struct CorruptingClient {
    inner: Arc<FakeKms>,
}

impl KmsClient for CorruptingClient {
    fn list_crypto_keys(&self, parent: &str) -> ClientResult<Vec<CryptoKey>> {
        KmsClient::list_crypto_keys(self.inner.as_ref(), parent)
    }

    fn list_crypto_key_versions(&self, parent: &str) -> ClientResult<Vec<CryptoKeyVersion>> {
        KmsClient::list_crypto_key_versions(self.inner.as_ref(), parent)
    }

    fn get_public_key(&self, name: &str) -> ClientResult<PublicKey> {
        let mut pk = KmsClient::get_public_key(self.inner.as_ref(), name)?;
        pk.pem_crc32c = pk.pem_crc32c.wrapping_add(1);
        Ok(pk)
    }

    fn asymmetric_sign(&self, req: AsymmetricSignRequest) -> ClientResult<AsymmetricSignResponse> {
        KmsClient::asymmetric_sign(self.inner.as_ref(), req)
    }

    fn asymmetric_decrypt(
        &self,
        req: AsymmetricDecryptRequest,
    ) -> ClientResult<AsymmetricDecryptResponse> {
        KmsClient::asymmetric_decrypt(self.inner.as_ref(), req)
    }
}

#[test]
fn initialize_finalize_lifecycle() {
    assert_eq!(api::get_info().err(), Some(Error::CryptokiNotInitialized));
    assert_eq!(api::finalize(), Err(Error::CryptokiNotInitialized));

    let kms = Arc::new(FakeKms::new());
    let ring = kms
        .create_key_ring("projects/test/locations/global", "lifecycle-ring")
        .unwrap()
        .name;
    kms.create_crypto_key(
        &ring,
        "ec",
        KeyPurpose::AsymmetricSign,
        Algorithm::EcSignP256Sha256,
    )
    .unwrap();
    let config = Config::from_yaml(&format!("slots:\n  - key_ring: \"{}\"\n", ring)).unwrap();

    // A response-integrity failure during slot population surfaces as a
    // device error and leaves the provider uninitialized.
    let corrupting = Arc::new(CorruptingClient { inner: kms.clone() });
    assert_eq!(
        api::initialize(&config, corrupting),
        Err(Error::DeviceError)
    );
    assert_eq!(api::get_info().err(), Some(Error::CryptokiNotInitialized));

    api::initialize(&config, kms.clone()).unwrap();
    let info = api::get_info().unwrap();
    assert_eq!(info.cryptoki_version.major, 2);
    assert_eq!(info.cryptoki_version.minor, 40);

    let session = api::open_session(0, ck::CKF_SERIAL_SESSION).unwrap();
    api::finalize().unwrap();

    // Finalize dropped the session and the singleton.
    assert_eq!(
        api::get_session_info(session).err(),
        Some(Error::SessionHandleInvalid)
    );
    assert_eq!(api::get_info().err(), Some(Error::CryptokiNotInitialized));

    // The provider can come back up afterwards.
    api::initialize(&config, kms).unwrap();
    let session = api::open_session(0, ck::CKF_SERIAL_SESSION).unwrap();
    api::get_session_info(session).unwrap();
    api::finalize().unwrap();
}
