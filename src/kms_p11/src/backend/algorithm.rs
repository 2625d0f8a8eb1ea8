use kms_rpc::api::{Algorithm, DigestAlgorithm, KeyPurpose};

use crate::ck;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EcCurve {
    P256,
    P384,
}

impl EcCurve {
    pub fn coordinate_len(self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
        }
    }
}

/// Everything the provider needs to know about one KMS algorithm. The
/// registry below is the single source of truth: mechanism dispatch and
/// object materialisation both consult it.
#[derive(Clone, Copy, Debug)]
pub struct AlgorithmDetails {
    pub algorithm: Algorithm,
    pub purpose: KeyPurpose,
    pub key_type: ck::CK_KEY_TYPE,
    pub key_bits: ck::CK_ULONG,
    pub key_gen_mechanism: ck::CK_MECHANISM_TYPE,
    /// Ordered, deduplicated.
    pub allowed_mechanisms: &'static [ck::CK_MECHANISM_TYPE],
    /// The digest the algorithm binds, or None for raw-input algorithms.
    pub digest: Option<DigestAlgorithm>,
    /// Cryptoki-format signature length in bytes; 0 for decrypt algorithms.
    pub signature_length: usize,
    pub curve: Option<EcCurve>,
}

const RSA_PKCS1_SHA256_MECHS: &[ck::CK_MECHANISM_TYPE] =
    &[ck::CKM_RSA_PKCS, ck::CKM_SHA256_RSA_PKCS];
const RSA_PKCS1_SHA512_MECHS: &[ck::CK_MECHANISM_TYPE] =
    &[ck::CKM_RSA_PKCS, ck::CKM_SHA512_RSA_PKCS];
const RSA_PSS_SHA256_MECHS: &[ck::CK_MECHANISM_TYPE] =
    &[ck::CKM_RSA_PKCS_PSS, ck::CKM_SHA256_RSA_PKCS_PSS];
const RSA_PSS_SHA512_MECHS: &[ck::CK_MECHANISM_TYPE] =
    &[ck::CKM_RSA_PKCS_PSS, ck::CKM_SHA512_RSA_PKCS_PSS];
const RSA_RAW_PKCS1_MECHS: &[ck::CK_MECHANISM_TYPE] = &[
    ck::CKM_RSA_PKCS,
    ck::CKM_SHA256_RSA_PKCS,
    ck::CKM_SHA512_RSA_PKCS,
];
const RSA_OAEP_MECHS: &[ck::CK_MECHANISM_TYPE] = &[ck::CKM_RSA_PKCS_OAEP];
const ECDSA_SHA256_MECHS: &[ck::CK_MECHANISM_TYPE] = &[ck::CKM_ECDSA, ck::CKM_ECDSA_SHA256];
const ECDSA_SHA384_MECHS: &[ck::CK_MECHANISM_TYPE] = &[ck::CKM_ECDSA, ck::CKM_ECDSA_SHA384];

macro_rules! rsa_details {
    ($alg:ident, $purpose:ident, $bits:expr, $mechs:expr, $digest:expr, $sig_len:expr) => {
        AlgorithmDetails {
            algorithm: Algorithm::$alg,
            purpose: KeyPurpose::$purpose,
            key_type: ck::CKK_RSA,
            key_bits: $bits,
            key_gen_mechanism: ck::CKM_RSA_PKCS_KEY_PAIR_GEN,
            allowed_mechanisms: $mechs,
            digest: $digest,
            signature_length: $sig_len,
            curve: None,
        }
    };
}

static DETAILS: &[AlgorithmDetails] = &[
    rsa_details!(
        RsaSignPkcs1_2048Sha256,
        AsymmetricSign,
        2048,
        RSA_PKCS1_SHA256_MECHS,
        Some(DigestAlgorithm::Sha256),
        256
    ),
    rsa_details!(
        RsaSignPkcs1_3072Sha256,
        AsymmetricSign,
        3072,
        RSA_PKCS1_SHA256_MECHS,
        Some(DigestAlgorithm::Sha256),
        384
    ),
    rsa_details!(
        RsaSignPkcs1_4096Sha256,
        AsymmetricSign,
        4096,
        RSA_PKCS1_SHA256_MECHS,
        Some(DigestAlgorithm::Sha256),
        512
    ),
    rsa_details!(
        RsaSignPkcs1_4096Sha512,
        AsymmetricSign,
        4096,
        RSA_PKCS1_SHA512_MECHS,
        Some(DigestAlgorithm::Sha512),
        512
    ),
    rsa_details!(
        RsaSignPss2048Sha256,
        AsymmetricSign,
        2048,
        RSA_PSS_SHA256_MECHS,
        Some(DigestAlgorithm::Sha256),
        256
    ),
    rsa_details!(
        RsaSignPss3072Sha256,
        AsymmetricSign,
        3072,
        RSA_PSS_SHA256_MECHS,
        Some(DigestAlgorithm::Sha256),
        384
    ),
    rsa_details!(
        RsaSignPss4096Sha256,
        AsymmetricSign,
        4096,
        RSA_PSS_SHA256_MECHS,
        Some(DigestAlgorithm::Sha256),
        512
    ),
    rsa_details!(
        RsaSignPss4096Sha512,
        AsymmetricSign,
        4096,
        RSA_PSS_SHA512_MECHS,
        Some(DigestAlgorithm::Sha512),
        512
    ),
    rsa_details!(
        RsaSignRawPkcs1_2048,
        AsymmetricSign,
        2048,
        RSA_RAW_PKCS1_MECHS,
        None,
        256
    ),
    rsa_details!(
        RsaSignRawPkcs1_3072,
        AsymmetricSign,
        3072,
        RSA_RAW_PKCS1_MECHS,
        None,
        384
    ),
    rsa_details!(
        RsaSignRawPkcs1_4096,
        AsymmetricSign,
        4096,
        RSA_RAW_PKCS1_MECHS,
        None,
        512
    ),
    rsa_details!(
        RsaDecryptOaep2048Sha256,
        AsymmetricDecrypt,
        2048,
        RSA_OAEP_MECHS,
        Some(DigestAlgorithm::Sha256),
        0
    ),
    rsa_details!(
        RsaDecryptOaep3072Sha256,
        AsymmetricDecrypt,
        3072,
        RSA_OAEP_MECHS,
        Some(DigestAlgorithm::Sha256),
        0
    ),
    rsa_details!(
        RsaDecryptOaep4096Sha256,
        AsymmetricDecrypt,
        4096,
        RSA_OAEP_MECHS,
        Some(DigestAlgorithm::Sha256),
        0
    ),
    rsa_details!(
        RsaDecryptOaep4096Sha512,
        AsymmetricDecrypt,
        4096,
        RSA_OAEP_MECHS,
        Some(DigestAlgorithm::Sha512),
        0
    ),
    AlgorithmDetails {
        algorithm: Algorithm::EcSignP256Sha256,
        purpose: KeyPurpose::AsymmetricSign,
        key_type: ck::CKK_EC,
        key_bits: 256,
        key_gen_mechanism: ck::CKM_EC_KEY_PAIR_GEN,
        allowed_mechanisms: ECDSA_SHA256_MECHS,
        digest: Some(DigestAlgorithm::Sha256),
        signature_length: 64,
        curve: Some(EcCurve::P256),
    },
    AlgorithmDetails {
        algorithm: Algorithm::EcSignP384Sha384,
        purpose: KeyPurpose::AsymmetricSign,
        key_type: ck::CKK_EC,
        key_bits: 384,
        key_gen_mechanism: ck::CKM_EC_KEY_PAIR_GEN,
        allowed_mechanisms: ECDSA_SHA384_MECHS,
        digest: Some(DigestAlgorithm::Sha384),
        signature_length: 96,
        curve: Some(EcCurve::P384),
    },
];

/// Look up the details record for a KMS algorithm. Total over the
/// supported set; anything else is unimplemented.
pub fn details(algorithm: Algorithm) -> Result<&'static AlgorithmDetails> {
    DETAILS
        .iter()
        .find(|d| d.algorithm == algorithm)
        .ok_or(Error::GeneralError)
}

/// Every mechanism any supported algorithm admits, plus the standalone
/// digest mechanisms. Sorted ascending so repeated GetMechanismList calls
/// are byte-identical.
pub fn supported_mechanisms() -> &'static [ck::CK_MECHANISM_TYPE] {
    static MECHS: &[ck::CK_MECHANISM_TYPE] = &[
        ck::CKM_RSA_PKCS,
        ck::CKM_RSA_PKCS_OAEP,
        ck::CKM_RSA_PKCS_PSS,
        ck::CKM_SHA256_RSA_PKCS,
        ck::CKM_SHA512_RSA_PKCS,
        ck::CKM_SHA256_RSA_PKCS_PSS,
        ck::CKM_SHA512_RSA_PKCS_PSS,
        ck::CKM_SHA_1,
        ck::CKM_SHA256,
        ck::CKM_SHA224,
        ck::CKM_SHA384,
        ck::CKM_SHA512,
        ck::CKM_ECDSA,
        ck::CKM_ECDSA_SHA256,
        ck::CKM_ECDSA_SHA384,
    ];
    MECHS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_total_over_supported_set() {
        for d in DETAILS {
            let found = details(d.algorithm).unwrap();
            assert_eq!(found.algorithm, d.algorithm);
        }
    }

    #[test]
    fn symmetric_is_unimplemented() {
        assert!(details(Algorithm::GoogleSymmetricEncryption).is_err());
    }

    #[test]
    fn rsa_signature_length_matches_modulus() {
        for d in DETAILS.iter().filter(|d| d.key_type == ck::CKK_RSA) {
            if d.purpose == KeyPurpose::AsymmetricSign {
                assert_eq!(d.signature_length, d.key_bits as usize / 8);
            }
        }
    }

    #[test]
    fn ec_signature_length_is_twice_coordinate() {
        for d in DETAILS.iter().filter(|d| d.curve.is_some()) {
            assert_eq!(
                d.signature_length,
                2 * d.curve.unwrap().coordinate_len()
            );
        }
    }

    #[test]
    fn allowed_mechanism_lists_have_no_duplicates() {
        for d in DETAILS {
            let mut mechs = d.allowed_mechanisms.to_vec();
            mechs.sort_unstable();
            mechs.dedup();
            assert_eq!(mechs.len(), d.allowed_mechanisms.len());
        }
    }

    #[test]
    fn mechanism_list_is_deduplicated() {
        let mut mechs = supported_mechanisms().to_vec();
        mechs.sort_unstable();
        mechs.dedup();
        assert_eq!(mechs.len(), supported_mechanisms().len());
    }
}
