use kms_rpc::api::{DigestAlgorithm, KeyPurpose};

use super::algorithm::AlgorithmDetails;
use super::object::Object;
use crate::ck;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MechDigest {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl MechDigest {
    pub fn len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// The standalone digest mechanism code (CKM_SHAxxx).
    pub fn ck_type(&self) -> ck::CK_MECHANISM_TYPE {
        match self {
            Self::Sha1 => ck::CKM_SHA_1,
            Self::Sha224 => ck::CKM_SHA224,
            Self::Sha256 => ck::CKM_SHA256,
            Self::Sha384 => ck::CKM_SHA384,
            Self::Sha512 => ck::CKM_SHA512,
        }
    }

    pub fn mgf(&self) -> ck::CK_RSA_PKCS_MGF_TYPE {
        match self {
            Self::Sha1 => ck::CKG_MGF1_SHA1,
            Self::Sha224 => ck::CKG_MGF1_SHA224,
            Self::Sha256 => ck::CKG_MGF1_SHA256,
            Self::Sha384 => ck::CKG_MGF1_SHA384,
            Self::Sha512 => ck::CKG_MGF1_SHA512,
        }
    }

    pub fn from_wire(digest: DigestAlgorithm) -> Self {
        match digest {
            DigestAlgorithm::Sha256 => Self::Sha256,
            DigestAlgorithm::Sha384 => Self::Sha384,
            DigestAlgorithm::Sha512 => Self::Sha512,
        }
    }
}

/// CK_RSA_PKCS_PSS_PARAMS.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PssParams {
    pub hash_alg: ck::CK_MECHANISM_TYPE,
    pub mgf: ck::CK_RSA_PKCS_MGF_TYPE,
    pub salt_len: ck::CK_ULONG,
}

impl PssParams {
    pub fn for_digest(digest: MechDigest) -> Self {
        Self {
            hash_alg: digest.ck_type(),
            mgf: digest.mgf(),
            salt_len: digest.len() as ck::CK_ULONG,
        }
    }
}

/// CK_RSA_PKCS_OAEP_PARAMS. A non-empty source-data field is modeled but
/// never accepted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OaepParams {
    pub hash_alg: ck::CK_MECHANISM_TYPE,
    pub mgf: ck::CK_RSA_PKCS_MGF_TYPE,
    pub source_data: Option<Vec<u8>>,
}

impl OaepParams {
    pub fn for_digest(digest: MechDigest) -> Self {
        Self {
            hash_alg: digest.ck_type(),
            mgf: digest.mgf(),
            source_data: None,
        }
    }
}

/// A decoded mechanism: the mechanism code plus its parameter block.
#[derive(Clone, Debug, PartialEq)]
pub enum Mechanism {
    Digest(MechDigest),
    RsaPkcs(Option<MechDigest>),
    RsaPkcsPss(Option<MechDigest>, PssParams),
    RsaPkcsOaep(OaepParams),
    Ecdsa(Option<MechDigest>),
}

impl Mechanism {
    const RSA_MIN_KEY_BITS: ck::CK_ULONG = 2048;
    const RSA_MAX_KEY_BITS: ck::CK_ULONG = 4096;
    const EC_MIN_KEY_BITS: ck::CK_ULONG = 256;
    const EC_MAX_KEY_BITS: ck::CK_ULONG = 384;

    pub fn ck_type(&self) -> ck::CK_MECHANISM_TYPE {
        match self {
            Self::Digest(digest) => digest.ck_type(),
            Self::RsaPkcs(digest) => match digest {
                None => ck::CKM_RSA_PKCS,
                Some(MechDigest::Sha1) => ck::CKM_SHA1_RSA_PKCS,
                Some(MechDigest::Sha224) => ck::CKM_SHA224_RSA_PKCS,
                Some(MechDigest::Sha256) => ck::CKM_SHA256_RSA_PKCS,
                Some(MechDigest::Sha384) => ck::CKM_SHA384_RSA_PKCS,
                Some(MechDigest::Sha512) => ck::CKM_SHA512_RSA_PKCS,
            },
            Self::RsaPkcsPss(digest, _) => match digest {
                None => ck::CKM_RSA_PKCS_PSS,
                Some(MechDigest::Sha1) => ck::CKM_SHA1_RSA_PKCS_PSS,
                Some(MechDigest::Sha224) => ck::CKM_SHA224_RSA_PKCS_PSS,
                Some(MechDigest::Sha256) => ck::CKM_SHA256_RSA_PKCS_PSS,
                Some(MechDigest::Sha384) => ck::CKM_SHA384_RSA_PKCS_PSS,
                Some(MechDigest::Sha512) => ck::CKM_SHA512_RSA_PKCS_PSS,
            },
            Self::RsaPkcsOaep(_) => ck::CKM_RSA_PKCS_OAEP,
            Self::Ecdsa(digest) => match digest {
                None => ck::CKM_ECDSA,
                Some(MechDigest::Sha1) => ck::CKM_ECDSA_SHA1,
                Some(MechDigest::Sha224) => ck::CKM_ECDSA_SHA224,
                Some(MechDigest::Sha256) => ck::CKM_ECDSA_SHA256,
                Some(MechDigest::Sha384) => ck::CKM_ECDSA_SHA384,
                Some(MechDigest::Sha512) => ck::CKM_ECDSA_SHA512,
            },
        }
    }

    /// Digest-bearing sign/verify mechanisms admit the Update/Final flow.
    pub fn is_multipart(&self) -> bool {
        match self {
            Self::RsaPkcs(digest) | Self::RsaPkcsPss(digest, _) | Self::Ecdsa(digest) => {
                digest.is_some()
            }
            _ => false,
        }
    }
}

/// Mechanism info for GetMechanismInfo, keyed by the bare mechanism code.
pub fn info_for_type(mech_type: ck::CK_MECHANISM_TYPE) -> Result<ck::CK_MECHANISM_INFO> {
    let (min_bits, max_bits, flags) = match mech_type {
        ck::CKM_SHA_1 | ck::CKM_SHA224 | ck::CKM_SHA256 | ck::CKM_SHA384 | ck::CKM_SHA512 => {
            (0, 0, ck::CKF_DIGEST)
        }
        ck::CKM_RSA_PKCS => (
            Mechanism::RSA_MIN_KEY_BITS,
            Mechanism::RSA_MAX_KEY_BITS,
            ck::CKF_SIGN | ck::CKF_VERIFY,
        ),
        ck::CKM_SHA256_RSA_PKCS
        | ck::CKM_SHA512_RSA_PKCS
        | ck::CKM_RSA_PKCS_PSS
        | ck::CKM_SHA256_RSA_PKCS_PSS
        | ck::CKM_SHA512_RSA_PKCS_PSS => (
            Mechanism::RSA_MIN_KEY_BITS,
            Mechanism::RSA_MAX_KEY_BITS,
            ck::CKF_SIGN | ck::CKF_VERIFY,
        ),
        ck::CKM_RSA_PKCS_OAEP => (
            Mechanism::RSA_MIN_KEY_BITS,
            Mechanism::RSA_MAX_KEY_BITS,
            ck::CKF_ENCRYPT | ck::CKF_DECRYPT,
        ),
        ck::CKM_ECDSA | ck::CKM_ECDSA_SHA256 | ck::CKM_ECDSA_SHA384 => (
            Mechanism::EC_MIN_KEY_BITS,
            Mechanism::EC_MAX_KEY_BITS,
            ck::CKF_SIGN
                | ck::CKF_VERIFY
                | ck::CKF_EC_F_P
                | ck::CKF_EC_NAMEDCURVE
                | ck::CKF_EC_UNCOMPRESS,
        ),
        _ => return Err(Error::MechanismInvalid),
    };
    Ok(ck::CK_MECHANISM_INFO {
        min_key_size: min_bits,
        max_key_size: max_bits,
        flags: ck::CKF_HW | flags,
    })
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyOp {
    Sign,
    Verify,
    Encrypt,
    Decrypt,
}

/// Mechanism dispatch validation, in the order the standard implies:
/// key class, key type, key purpose, the algorithm's allowed-mechanism
/// set, and finally the parameter block.
pub fn validate_for_key(
    mech: &Mechanism,
    op: KeyOp,
    key: &Object,
) -> Result<&'static AlgorithmDetails> {
    let details = key.algorithm();

    let wanted_class = match op {
        KeyOp::Sign | KeyOp::Decrypt => ck::CKO_PRIVATE_KEY,
        KeyOp::Verify | KeyOp::Encrypt => ck::CKO_PUBLIC_KEY,
    };
    if key.class() != wanted_class {
        return Err(Error::KeyFunctionNotPermitted);
    }

    let wanted_key_type = match mech {
        Mechanism::RsaPkcs(_) | Mechanism::RsaPkcsPss(..) | Mechanism::RsaPkcsOaep(_) => {
            ck::CKK_RSA
        }
        Mechanism::Ecdsa(_) => ck::CKK_EC,
        Mechanism::Digest(_) => return Err(Error::MechanismInvalid),
    };
    if details.key_type != wanted_key_type {
        return Err(Error::KeyTypeInconsistent);
    }

    let wanted_purpose = match op {
        KeyOp::Sign | KeyOp::Verify => KeyPurpose::AsymmetricSign,
        KeyOp::Encrypt | KeyOp::Decrypt => KeyPurpose::AsymmetricDecrypt,
    };
    if details.purpose != wanted_purpose {
        return Err(Error::KeyFunctionNotPermitted);
    }

    if !details.allowed_mechanisms.contains(&mech.ck_type()) {
        return Err(Error::MechanismInvalid);
    }

    validate_params(mech, details)?;
    Ok(details)
}

/// Parameter-block checks. The digest in PSS/OAEP parameters must equal
/// the digest the mechanism (or, for the pre-digested single-shot forms,
/// the algorithm) binds; the salt length must equal the digest length; the
/// MGF must be MGF1 over the same digest; the OAEP source must be empty.
fn validate_params(mech: &Mechanism, details: &AlgorithmDetails) -> Result<()> {
    let bound_digest = || -> Result<MechDigest> {
        details
            .digest
            .map(MechDigest::from_wire)
            .ok_or(Error::MechanismParamInvalid)
    };

    match mech {
        Mechanism::RsaPkcsPss(mech_digest, params) => {
            let digest = match mech_digest {
                Some(d) => *d,
                None => bound_digest()?,
            };
            if params.hash_alg != digest.ck_type()
                || params.mgf != digest.mgf()
                || params.salt_len != digest.len() as ck::CK_ULONG
            {
                return Err(Error::MechanismParamInvalid);
            }
        }
        Mechanism::RsaPkcsOaep(params) => {
            let digest = bound_digest()?;
            if params.hash_alg != digest.ck_type()
                || params.mgf != digest.mgf()
                || params.source_data.is_some()
            {
                return Err(Error::MechanismParamInvalid);
            }
        }
        _ => (),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pss_params_helper_is_consistent() {
        let params = PssParams::for_digest(MechDigest::Sha256);
        assert_eq!(params.hash_alg, ck::CKM_SHA256);
        assert_eq!(params.mgf, ck::CKG_MGF1_SHA256);
        assert_eq!(params.salt_len, 32);
    }

    #[test]
    fn mechanism_types_roundtrip() {
        assert_eq!(
            Mechanism::RsaPkcs(Some(MechDigest::Sha256)).ck_type(),
            ck::CKM_SHA256_RSA_PKCS
        );
        assert_eq!(Mechanism::Ecdsa(None).ck_type(), ck::CKM_ECDSA);
        assert_eq!(
            Mechanism::RsaPkcsPss(None, PssParams::for_digest(MechDigest::Sha256)).ck_type(),
            ck::CKM_RSA_PKCS_PSS
        );
    }

    #[test]
    fn multipart_only_with_digest() {
        assert!(Mechanism::Ecdsa(Some(MechDigest::Sha256)).is_multipart());
        assert!(!Mechanism::Ecdsa(None).is_multipart());
        assert!(!Mechanism::RsaPkcsOaep(OaepParams::for_digest(MechDigest::Sha256)).is_multipart());
    }

    #[test]
    fn unknown_mechanism_info_is_invalid() {
        assert_eq!(
            info_for_type(ck::CKM_RSA_X_509),
            Err(Error::MechanismInvalid)
        );
    }

    #[test]
    fn digest_mechanism_info_has_digest_flag() {
        let info = info_for_type(ck::CKM_SHA256).unwrap();
        assert_eq!(info.flags & ck::CKF_DIGEST, ck::CKF_DIGEST);
    }
}
