use std::collections::BTreeMap;
use std::sync::Mutex;

use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Oaep, Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha512};
use signature::hazmat::PrehashSigner;

use kms_rpc::api::{
    Algorithm, ApiResult, AsymmetricDecryptRequest, AsymmetricDecryptResponse,
    AsymmetricSignRequest, AsymmetricSignResponse, CryptoKey, CryptoKeyVersion, DigestAlgorithm,
    Error as ClientError, KeyPurpose, KeyRing, KeyVersionState, KmsClient, PublicKey,
    Result as ClientResult, RpcError, StatusCode,
};

enum KeyMaterial {
    Rsa(RsaPrivateKey),
    P256(p256::SecretKey),
    P384(p384::SecretKey),
    /// Symmetric keys carry no exportable material; they exist so that
    /// enumeration against mixed key rings can be exercised.
    Symmetric,
}

struct VersionEntry {
    algorithm: Algorithm,
    state: KeyVersionState,
    material: KeyMaterial,
}

struct KeyEntry {
    purpose: KeyPurpose,
    algorithm: Algorithm,
}

#[derive(Default)]
struct Store {
    key_rings: BTreeMap<String, ()>,
    keys: BTreeMap<String, KeyEntry>,
    versions: BTreeMap<String, VersionEntry>,
}

/// The in-memory KMS. All state lives behind one mutex; the operations are
/// short (keygen being the exception) and the fake is a test fixture, not a
/// throughput target.
pub struct FakeKms {
    store: Mutex<Store>,
}

fn invalid_argument(msg: &str) -> RpcError {
    RpcError::new(StatusCode::InvalidArgument, msg)
}

fn not_found(name: &str) -> RpcError {
    RpcError::new(StatusCode::NotFound, &format!("not found: {}", name))
}

fn internal(msg: &str) -> RpcError {
    RpcError::new(StatusCode::Internal, msg)
}

fn rsa_key_bits(algorithm: Algorithm) -> Option<usize> {
    match algorithm {
        Algorithm::RsaSignPkcs1_2048Sha256
        | Algorithm::RsaSignPss2048Sha256
        | Algorithm::RsaSignRawPkcs1_2048
        | Algorithm::RsaDecryptOaep2048Sha256 => Some(2048),
        Algorithm::RsaSignPkcs1_3072Sha256
        | Algorithm::RsaSignPss3072Sha256
        | Algorithm::RsaSignRawPkcs1_3072
        | Algorithm::RsaDecryptOaep3072Sha256 => Some(3072),
        Algorithm::RsaSignPkcs1_4096Sha256
        | Algorithm::RsaSignPkcs1_4096Sha512
        | Algorithm::RsaSignPss4096Sha256
        | Algorithm::RsaSignPss4096Sha512
        | Algorithm::RsaSignRawPkcs1_4096
        | Algorithm::RsaDecryptOaep4096Sha256
        | Algorithm::RsaDecryptOaep4096Sha512 => Some(4096),
        _ => None,
    }
}

fn generate_material(algorithm: Algorithm) -> ApiResult<KeyMaterial> {
    if let Some(bits) = rsa_key_bits(algorithm) {
        let key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|_| internal("RSA key generation failed"))?;
        return Ok(KeyMaterial::Rsa(key));
    }
    match algorithm {
        Algorithm::EcSignP256Sha256 => Ok(KeyMaterial::P256(p256::SecretKey::random(&mut OsRng))),
        Algorithm::EcSignP384Sha384 => Ok(KeyMaterial::P384(p384::SecretKey::random(&mut OsRng))),
        Algorithm::GoogleSymmetricEncryption => Ok(KeyMaterial::Symmetric),
        _ => Err(RpcError::new(
            StatusCode::Unimplemented,
            "unsupported algorithm",
        )),
    }
}

/// Pull the digest out of a sign request, insisting on the digest
/// algorithm the key version was created with.
fn required_digest(req: &AsymmetricSignRequest, want: DigestAlgorithm) -> ApiResult<Vec<u8>> {
    match &req.digest {
        Some(d) if d.algorithm == want => Ok(d.bytes.clone()),
        Some(_) => Err(invalid_argument("digest algorithm mismatch")),
        None => Err(invalid_argument("digest is required for this algorithm")),
    }
}

fn as_rsa(material: &KeyMaterial) -> ApiResult<&RsaPrivateKey> {
    match material {
        KeyMaterial::Rsa(key) => Ok(key),
        _ => Err(internal("key material / algorithm mismatch")),
    }
}

impl FakeKms {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::default()),
        }
    }

    pub fn create_key_ring(&self, parent: &str, key_ring_id: &str) -> ApiResult<KeyRing> {
        let mut store = self.store.lock().unwrap();
        let name = format!("{}/keyRings/{}", parent, key_ring_id);
        if store.key_rings.contains_key(&name) {
            return Err(RpcError::new(StatusCode::AlreadyExists, &name));
        }
        store.key_rings.insert(name.clone(), ());
        Ok(KeyRing { name })
    }

    /// Create a crypto key and immediately generate its (single) enabled
    /// primary version, the way tests expect to consume it.
    pub fn create_crypto_key(
        &self,
        parent: &str,
        crypto_key_id: &str,
        purpose: KeyPurpose,
        algorithm: Algorithm,
    ) -> ApiResult<CryptoKey> {
        // Generate outside the lock; RSA keygen is slow.
        let material = generate_material(algorithm)?;

        let mut store = self.store.lock().unwrap();
        if !store.key_rings.contains_key(parent) {
            return Err(not_found(parent));
        }
        let key_name = format!("{}/cryptoKeys/{}", parent, crypto_key_id);
        if store.keys.contains_key(&key_name) {
            return Err(RpcError::new(StatusCode::AlreadyExists, &key_name));
        }
        let version_name = format!("{}/cryptoKeyVersions/1", key_name);
        store.keys.insert(
            key_name.clone(),
            KeyEntry {
                purpose,
                algorithm,
            },
        );
        store.versions.insert(
            version_name,
            VersionEntry {
                algorithm,
                state: KeyVersionState::Enabled,
                material,
            },
        );
        Ok(CryptoKey {
            name: key_name,
            purpose,
            algorithm,
        })
    }

    /// Flip a version's state; lets tests exercise disabled-version
    /// filtering during slot enumeration.
    pub fn set_version_state(&self, name: &str, state: KeyVersionState) -> ApiResult<()> {
        let mut store = self.store.lock().unwrap();
        let ver = store.versions.get_mut(name).ok_or_else(|| not_found(name))?;
        ver.state = state;
        Ok(())
    }

    pub fn list_key_rings(&self, parent: &str) -> ApiResult<Vec<KeyRing>> {
        let store = self.store.lock().unwrap();
        let prefix = format!("{}/keyRings/", parent);
        Ok(store
            .key_rings
            .range(prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&prefix))
            .map(|(name, _)| KeyRing { name: name.clone() })
            .collect())
    }

    pub fn list_crypto_keys(&self, parent: &str) -> ApiResult<Vec<CryptoKey>> {
        let store = self.store.lock().unwrap();
        if !store.key_rings.contains_key(parent) {
            return Err(not_found(parent));
        }
        let prefix = format!("{}/cryptoKeys/", parent);
        Ok(store
            .keys
            .range(prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&prefix))
            .map(|(name, entry)| CryptoKey {
                name: name.clone(),
                purpose: entry.purpose,
                algorithm: entry.algorithm,
            })
            .collect())
    }

    pub fn list_crypto_key_versions(&self, parent: &str) -> ApiResult<Vec<CryptoKeyVersion>> {
        let store = self.store.lock().unwrap();
        if !store.keys.contains_key(parent) {
            return Err(not_found(parent));
        }
        let prefix = format!("{}/cryptoKeyVersions/", parent);
        Ok(store
            .versions
            .range(prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&prefix))
            .map(|(name, entry)| CryptoKeyVersion {
                name: name.clone(),
                algorithm: entry.algorithm,
                state: entry.state,
                import_job: String::new(),
            })
            .collect())
    }

    pub fn get_public_key(&self, name: &str) -> ApiResult<PublicKey> {
        let store = self.store.lock().unwrap();
        let ver = store.versions.get(name).ok_or_else(|| not_found(name))?;
        let pem = match &ver.material {
            KeyMaterial::Rsa(key) => RsaPublicKey::from(key)
                .to_public_key_pem(LineEnding::LF)
                .map_err(|_| internal("PEM encoding failed"))?,
            KeyMaterial::P256(key) => key
                .public_key()
                .to_public_key_pem(LineEnding::LF)
                .map_err(|_| internal("PEM encoding failed"))?,
            KeyMaterial::P384(key) => key
                .public_key()
                .to_public_key_pem(LineEnding::LF)
                .map_err(|_| internal("PEM encoding failed"))?,
            KeyMaterial::Symmetric => {
                return Err(RpcError::new(
                    StatusCode::FailedPrecondition,
                    "symmetric key versions have no public key",
                ))
            }
        };
        Ok(PublicKey {
            pem_crc32c: crc32c::crc32c(pem.as_bytes()),
            pem,
            algorithm: ver.algorithm,
            name: name.to_string(),
        })
    }

    pub fn asymmetric_sign(&self, req: &AsymmetricSignRequest) -> ApiResult<AsymmetricSignResponse> {
        let store = self.store.lock().unwrap();
        let ver = store
            .versions
            .get(&req.name)
            .ok_or_else(|| not_found(&req.name))?;
        if ver.state != KeyVersionState::Enabled {
            return Err(RpcError::new(
                StatusCode::FailedPrecondition,
                "key version is not enabled",
            ));
        }

        let mut verified_digest_crc32c = false;
        let mut verified_data_crc32c = false;
        if let (Some(digest), Some(crc)) = (&req.digest, req.digest_crc32c) {
            if crc32c::crc32c(&digest.bytes) != crc {
                return Err(invalid_argument("digest_crc32c mismatch"));
            }
            verified_digest_crc32c = true;
        }
        if let Some(crc) = req.data_crc32c {
            if crc32c::crc32c(&req.data) != crc {
                return Err(invalid_argument("data_crc32c mismatch"));
            }
            verified_data_crc32c = true;
        }

        let signature = match ver.algorithm {
            Algorithm::RsaSignPkcs1_2048Sha256
            | Algorithm::RsaSignPkcs1_3072Sha256
            | Algorithm::RsaSignPkcs1_4096Sha256 => {
                let digest = required_digest(req, DigestAlgorithm::Sha256)?;
                as_rsa(&ver.material)?
                    .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                    .map_err(|_| invalid_argument("PKCS#1 signing failed"))?
            }
            Algorithm::RsaSignPkcs1_4096Sha512 => {
                let digest = required_digest(req, DigestAlgorithm::Sha512)?;
                as_rsa(&ver.material)?
                    .sign(Pkcs1v15Sign::new::<Sha512>(), &digest)
                    .map_err(|_| invalid_argument("PKCS#1 signing failed"))?
            }
            Algorithm::RsaSignPss2048Sha256
            | Algorithm::RsaSignPss3072Sha256
            | Algorithm::RsaSignPss4096Sha256 => {
                let digest = required_digest(req, DigestAlgorithm::Sha256)?;
                as_rsa(&ver.material)?
                    .sign_with_rng(&mut OsRng, Pss::new::<Sha256>(), &digest)
                    .map_err(|_| invalid_argument("PSS signing failed"))?
            }
            Algorithm::RsaSignPss4096Sha512 => {
                let digest = required_digest(req, DigestAlgorithm::Sha512)?;
                as_rsa(&ver.material)?
                    .sign_with_rng(&mut OsRng, Pss::new::<Sha512>(), &digest)
                    .map_err(|_| invalid_argument("PSS signing failed"))?
            }
            Algorithm::RsaSignRawPkcs1_2048
            | Algorithm::RsaSignRawPkcs1_3072
            | Algorithm::RsaSignRawPkcs1_4096 => {
                if req.data.is_empty() {
                    return Err(invalid_argument("data is required for raw PKCS#1"));
                }
                as_rsa(&ver.material)?
                    .sign(Pkcs1v15Sign::new_unprefixed(), &req.data)
                    .map_err(|_| invalid_argument("raw PKCS#1 signing failed"))?
            }
            Algorithm::EcSignP256Sha256 => {
                let digest = required_digest(req, DigestAlgorithm::Sha256)?;
                match &ver.material {
                    KeyMaterial::P256(key) => {
                        let signing_key = p256::ecdsa::SigningKey::from(key);
                        let sig: p256::ecdsa::Signature = signing_key
                            .sign_prehash(&digest)
                            .map_err(|_| invalid_argument("ECDSA signing failed"))?;
                        sig.to_der().as_bytes().to_vec()
                    }
                    _ => return Err(internal("key material / algorithm mismatch")),
                }
            }
            Algorithm::EcSignP384Sha384 => {
                let digest = required_digest(req, DigestAlgorithm::Sha384)?;
                match &ver.material {
                    KeyMaterial::P384(key) => {
                        let signing_key = p384::ecdsa::SigningKey::from(key);
                        let sig: p384::ecdsa::Signature = signing_key
                            .sign_prehash(&digest)
                            .map_err(|_| invalid_argument("ECDSA signing failed"))?;
                        sig.to_der().as_bytes().to_vec()
                    }
                    _ => return Err(internal("key material / algorithm mismatch")),
                }
            }
            _ => {
                return Err(RpcError::new(
                    StatusCode::FailedPrecondition,
                    "key version does not support AsymmetricSign",
                ))
            }
        };

        Ok(AsymmetricSignResponse {
            name: req.name.clone(),
            signature_crc32c: crc32c::crc32c(&signature),
            signature,
            verified_digest_crc32c,
            verified_data_crc32c,
        })
    }

    pub fn asymmetric_decrypt(
        &self,
        req: &AsymmetricDecryptRequest,
    ) -> ApiResult<AsymmetricDecryptResponse> {
        let store = self.store.lock().unwrap();
        let ver = store
            .versions
            .get(&req.name)
            .ok_or_else(|| not_found(&req.name))?;
        if ver.state != KeyVersionState::Enabled {
            return Err(RpcError::new(
                StatusCode::FailedPrecondition,
                "key version is not enabled",
            ));
        }

        let mut verified_ciphertext_crc32c = false;
        if let Some(crc) = req.ciphertext_crc32c {
            if crc32c::crc32c(&req.ciphertext) != crc {
                return Err(invalid_argument("ciphertext_crc32c mismatch"));
            }
            verified_ciphertext_crc32c = true;
        }

        let padding = match ver.algorithm {
            Algorithm::RsaDecryptOaep2048Sha256
            | Algorithm::RsaDecryptOaep3072Sha256
            | Algorithm::RsaDecryptOaep4096Sha256 => Oaep::new::<Sha256>(),
            Algorithm::RsaDecryptOaep4096Sha512 => Oaep::new::<Sha512>(),
            _ => {
                return Err(RpcError::new(
                    StatusCode::FailedPrecondition,
                    "key version does not support AsymmetricDecrypt",
                ))
            }
        };
        let plaintext = as_rsa(&ver.material)?
            .decrypt(padding, &req.ciphertext)
            .map_err(|_| invalid_argument("OAEP decryption failed"))?;

        Ok(AsymmetricDecryptResponse {
            plaintext_crc32c: crc32c::crc32c(&plaintext),
            plaintext,
            verified_ciphertext_crc32c,
        })
    }
}

impl Default for FakeKms {
    fn default() -> Self {
        Self::new()
    }
}

impl KmsClient for FakeKms {
    fn list_crypto_keys(&self, parent: &str) -> ClientResult<Vec<CryptoKey>> {
        FakeKms::list_crypto_keys(self, parent).map_err(ClientError::Rpc)
    }

    fn list_crypto_key_versions(&self, parent: &str) -> ClientResult<Vec<CryptoKeyVersion>> {
        FakeKms::list_crypto_key_versions(self, parent).map_err(ClientError::Rpc)
    }

    fn get_public_key(&self, name: &str) -> ClientResult<PublicKey> {
        FakeKms::get_public_key(self, name).map_err(ClientError::Rpc)
    }

    fn asymmetric_sign(&self, req: AsymmetricSignRequest) -> ClientResult<AsymmetricSignResponse> {
        FakeKms::asymmetric_sign(self, &req).map_err(ClientError::Rpc)
    }

    fn asymmetric_decrypt(
        &self,
        req: AsymmetricDecryptRequest,
    ) -> ClientResult<AsymmetricDecryptResponse> {
        FakeKms::asymmetric_decrypt(self, &req).map_err(ClientError::Rpc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PublicKeyParts;

    const PARENT: &str = "projects/test/locations/global";

    fn ring(kms: &FakeKms, id: &str) -> String {
        kms.create_key_ring(PARENT, id).unwrap().name
    }

    #[test]
    fn create_and_list() {
        let kms = FakeKms::new();
        let kr = ring(&kms, "ring-a");
        kms.create_crypto_key(&kr, "k1", KeyPurpose::AsymmetricSign, Algorithm::EcSignP256Sha256)
            .unwrap();
        kms.create_crypto_key(&kr, "k2", KeyPurpose::AsymmetricSign, Algorithm::EcSignP384Sha384)
            .unwrap();

        let keys = kms.list_crypto_keys(&kr).unwrap();
        assert_eq!(keys.len(), 2);
        let versions = kms.list_crypto_key_versions(&keys[0].name).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].state, KeyVersionState::Enabled);
        assert!(versions[0].name.ends_with("/cryptoKeyVersions/1"));
    }

    #[test]
    fn duplicate_key_ring_rejected() {
        let kms = FakeKms::new();
        ring(&kms, "dup");
        let err = kms.create_key_ring(PARENT, "dup").unwrap_err();
        assert_eq!(err.code, StatusCode::AlreadyExists);
    }

    #[test]
    fn public_key_pem_carries_valid_crc() {
        let kms = FakeKms::new();
        let kr = ring(&kms, "crc");
        let key = kms
            .create_crypto_key(&kr, "k", KeyPurpose::AsymmetricSign, Algorithm::EcSignP256Sha256)
            .unwrap();
        let versions = kms.list_crypto_key_versions(&key.name).unwrap();
        let pk = kms.get_public_key(&versions[0].name).unwrap();
        assert_eq!(pk.pem_crc32c, crc32c::crc32c(pk.pem.as_bytes()));
        assert!(pk.pem.starts_with("-----BEGIN PUBLIC KEY-----"));
    }

    #[test]
    fn sign_rejects_bad_digest_crc() {
        let kms = FakeKms::new();
        let kr = ring(&kms, "badcrc");
        let key = kms
            .create_crypto_key(&kr, "k", KeyPurpose::AsymmetricSign, Algorithm::EcSignP256Sha256)
            .unwrap();
        let version = kms.list_crypto_key_versions(&key.name).unwrap().remove(0);
        let req = AsymmetricSignRequest {
            name: version.name,
            digest: Some(kms_rpc::api::Digest {
                algorithm: DigestAlgorithm::Sha256,
                bytes: vec![0u8; 32],
            }),
            digest_crc32c: Some(1),
            data: Vec::new(),
            data_crc32c: None,
        };
        let err = kms.asymmetric_sign(&req).unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidArgument);
    }

    #[test]
    fn oaep_decrypt_roundtrip() {
        use rsa::pkcs8::DecodePublicKey;

        let kms = FakeKms::new();
        let kr = ring(&kms, "oaep");
        let key = kms
            .create_crypto_key(
                &kr,
                "k",
                KeyPurpose::AsymmetricDecrypt,
                Algorithm::RsaDecryptOaep2048Sha256,
            )
            .unwrap();
        let version = kms.list_crypto_key_versions(&key.name).unwrap().remove(0);
        let pk = kms.get_public_key(&version.name).unwrap();
        let rsa_pub = RsaPublicKey::from_public_key_pem(&pk.pem).unwrap();
        assert_eq!(rsa_pub.n().bits(), 2048);

        let msg = b"attack at dawn";
        let ciphertext = rsa_pub
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), msg)
            .unwrap();
        let resp = kms
            .asymmetric_decrypt(&AsymmetricDecryptRequest {
                name: version.name,
                ciphertext_crc32c: Some(crc32c::crc32c(&ciphertext)),
                ciphertext,
            })
            .unwrap();
        assert!(resp.verified_ciphertext_crc32c);
        assert_eq!(resp.plaintext, msg);
        assert_eq!(resp.plaintext_crc32c, crc32c::crc32c(msg));
    }
}
