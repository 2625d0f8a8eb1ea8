use serde::{Deserialize, Serialize};

use super::transport;

/// gRPC-style status codes carried by RPC-level failures. The server maps
/// store lookups and argument validation onto these; clients fold them into
/// their own error domain.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum StatusCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Unimplemented,
    Internal,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RpcError {
    pub code: StatusCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: StatusCode, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, RpcError>;

/// Errors surfaced to callers of the `KmsClient` facade.
#[derive(Debug)]
pub enum Error {
    /// The transport failed to deliver the call (I/O, framing, serde).
    Transport(transport::Error),
    /// The server answered with an RPC-level error.
    Rpc(RpcError),
    /// The server answered with a response of the wrong variant.
    ResponseMismatch,
}

pub type Result<T> = std::result::Result<T, Error>;

/// The KMS key-version algorithms this library knows about. Wire names
/// follow the upstream service enum.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Algorithm {
    #[serde(rename = "RSA_SIGN_PKCS1_2048_SHA256")]
    RsaSignPkcs1_2048Sha256,
    #[serde(rename = "RSA_SIGN_PKCS1_3072_SHA256")]
    RsaSignPkcs1_3072Sha256,
    #[serde(rename = "RSA_SIGN_PKCS1_4096_SHA256")]
    RsaSignPkcs1_4096Sha256,
    #[serde(rename = "RSA_SIGN_PKCS1_4096_SHA512")]
    RsaSignPkcs1_4096Sha512,
    #[serde(rename = "RSA_SIGN_PSS_2048_SHA256")]
    RsaSignPss2048Sha256,
    #[serde(rename = "RSA_SIGN_PSS_3072_SHA256")]
    RsaSignPss3072Sha256,
    #[serde(rename = "RSA_SIGN_PSS_4096_SHA256")]
    RsaSignPss4096Sha256,
    #[serde(rename = "RSA_SIGN_PSS_4096_SHA512")]
    RsaSignPss4096Sha512,
    #[serde(rename = "RSA_SIGN_RAW_PKCS1_2048")]
    RsaSignRawPkcs1_2048,
    #[serde(rename = "RSA_SIGN_RAW_PKCS1_3072")]
    RsaSignRawPkcs1_3072,
    #[serde(rename = "RSA_SIGN_RAW_PKCS1_4096")]
    RsaSignRawPkcs1_4096,
    #[serde(rename = "RSA_DECRYPT_OAEP_2048_SHA256")]
    RsaDecryptOaep2048Sha256,
    #[serde(rename = "RSA_DECRYPT_OAEP_3072_SHA256")]
    RsaDecryptOaep3072Sha256,
    #[serde(rename = "RSA_DECRYPT_OAEP_4096_SHA256")]
    RsaDecryptOaep4096Sha256,
    #[serde(rename = "RSA_DECRYPT_OAEP_4096_SHA512")]
    RsaDecryptOaep4096Sha512,
    #[serde(rename = "EC_SIGN_P256_SHA256")]
    EcSignP256Sha256,
    #[serde(rename = "EC_SIGN_P384_SHA384")]
    EcSignP384Sha384,
    #[serde(rename = "GOOGLE_SYMMETRIC_ENCRYPTION")]
    GoogleSymmetricEncryption,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum KeyPurpose {
    #[serde(rename = "ENCRYPT_DECRYPT")]
    EncryptDecrypt,
    #[serde(rename = "ASYMMETRIC_SIGN")]
    AsymmetricSign,
    #[serde(rename = "ASYMMETRIC_DECRYPT")]
    AsymmetricDecrypt,
    #[serde(rename = "MAC")]
    Mac,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum KeyVersionState {
    #[serde(rename = "PENDING_GENERATION")]
    PendingGeneration,
    #[serde(rename = "ENABLED")]
    Enabled,
    #[serde(rename = "DISABLED")]
    Disabled,
    #[serde(rename = "DESTROYED")]
    Destroyed,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct KeyRing {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CryptoKey {
    pub name: String,
    pub purpose: KeyPurpose,
    pub algorithm: Algorithm,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CryptoKeyVersion {
    pub name: String,
    pub algorithm: Algorithm,
    pub state: KeyVersionState,
    /// Resource name of the import job this version was imported through,
    /// or empty for locally generated material.
    #[serde(default)]
    pub import_job: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PublicKey {
    /// PEM-encoded SubjectPublicKeyInfo.
    pub pem: String,
    pub algorithm: Algorithm,
    /// CRC32C over the PEM bytes; receivers must verify it.
    pub pem_crc32c: u32,
    pub name: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DigestAlgorithm {
    #[serde(rename = "SHA256")]
    Sha256,
    #[serde(rename = "SHA384")]
    Sha384,
    #[serde(rename = "SHA512")]
    Sha512,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Digest {
    pub algorithm: DigestAlgorithm,
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
}

/// Sign request: exactly one of `digest` (pre-hashed algorithms) or `data`
/// (raw-signing algorithms) carries the input.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AsymmetricSignRequest {
    pub name: String,
    pub digest: Option<Digest>,
    pub digest_crc32c: Option<u32>,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    pub data_crc32c: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AsymmetricSignResponse {
    pub name: String,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    pub signature_crc32c: u32,
    pub verified_digest_crc32c: bool,
    pub verified_data_crc32c: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AsymmetricDecryptRequest {
    pub name: String,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
    pub ciphertext_crc32c: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AsymmetricDecryptResponse {
    #[serde(with = "serde_bytes")]
    pub plaintext: Vec<u8>,
    pub plaintext_crc32c: u32,
    pub verified_ciphertext_crc32c: bool,
}

/// An RPC API request, holding the API endpoint (i.e. procedure) and its
/// input params.
///
/// This type provides serialization (and deserialization) facilities, so
/// that it can be sent over an RPC transport.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum KmsRequest {
    ListKeyRings {
        parent: String,
    },
    CreateKeyRing {
        parent: String,
        key_ring_id: String,
    },
    ListCryptoKeys {
        parent: String,
    },
    CreateCryptoKey {
        parent: String,
        crypto_key_id: String,
        purpose: KeyPurpose,
        algorithm: Algorithm,
    },
    ListCryptoKeyVersions {
        parent: String,
    },
    GetPublicKey {
        name: String,
    },
    AsymmetricSign(AsymmetricSignRequest),
    AsymmetricDecrypt(AsymmetricDecryptRequest),
}

/// An RPC API response, holding the result type for every API endpoint
/// described by `KmsRequest`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum KmsResponse {
    ListKeyRings(ApiResult<Vec<KeyRing>>),
    CreateKeyRing(ApiResult<KeyRing>),
    ListCryptoKeys(ApiResult<Vec<CryptoKey>>),
    CreateCryptoKey(ApiResult<CryptoKey>),
    ListCryptoKeyVersions(ApiResult<Vec<CryptoKeyVersion>>),
    GetPublicKey(ApiResult<PublicKey>),
    AsymmetricSign(ApiResult<AsymmetricSignResponse>),
    AsymmetricDecrypt(ApiResult<AsymmetricDecryptResponse>),
}

/// The narrow KMS surface the provider core depends on. Implementations
/// block the calling thread; timeouts and retries are the implementor's
/// concern.
pub trait KmsClient: Send + Sync {
    fn list_crypto_keys(&self, parent: &str) -> Result<Vec<CryptoKey>>;
    fn list_crypto_key_versions(&self, parent: &str) -> Result<Vec<CryptoKeyVersion>>;
    fn get_public_key(&self, name: &str) -> Result<PublicKey>;
    fn asymmetric_sign(&self, req: AsymmetricSignRequest) -> Result<AsymmetricSignResponse>;
    fn asymmetric_decrypt(&self, req: AsymmetricDecryptRequest)
        -> Result<AsymmetricDecryptResponse>;
}
