use std::sync::Arc;

use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, Pss};
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use signature::hazmat::PrehashVerifier;

use super::digest::Hasher;
use super::sign::{strip_digest_info, PreDigestInput};
use super::{enter_single_part_state, enter_state, OpCtxState};
use crate::backend::mech::{MechDigest, Mechanism};
use crate::backend::object::{Object, PublicKeyMaterial};
use crate::{Error, Result};

/// Verification context. Verification never leaves the process: it runs
/// against the public key cached on the object, so prior signatures stay
/// verifiable offline and no KMS round trips are spent on it.
pub trait VerifyCtx: Send {
    fn update(&mut self, data: &[u8]) -> Result<()>;
    fn verify(self: Box<Self>, data: &[u8], signature: &[u8]) -> Result<()>;
    fn finalize(self: Box<Self>, signature: &[u8]) -> Result<()>;
    fn enter_state(&mut self, state: OpCtxState) -> Result<()>;
}

#[derive(Clone, Copy)]
enum VerifyScheme {
    Pkcs1(MechDigest),
    Pss(MechDigest),
    RawPkcs1,
    Ecdsa,
}

fn rsa_verify_pkcs1(
    key: &rsa::RsaPublicKey,
    digest: MechDigest,
    hashed: &[u8],
    signature: &[u8],
) -> rsa::Result<()> {
    match digest {
        MechDigest::Sha1 => key.verify(Pkcs1v15Sign::new::<Sha1>(), hashed, signature),
        MechDigest::Sha224 => key.verify(Pkcs1v15Sign::new::<Sha224>(), hashed, signature),
        MechDigest::Sha256 => key.verify(Pkcs1v15Sign::new::<Sha256>(), hashed, signature),
        MechDigest::Sha384 => key.verify(Pkcs1v15Sign::new::<Sha384>(), hashed, signature),
        MechDigest::Sha512 => key.verify(Pkcs1v15Sign::new::<Sha512>(), hashed, signature),
    }
}

fn rsa_verify_pss(
    key: &rsa::RsaPublicKey,
    digest: MechDigest,
    hashed: &[u8],
    signature: &[u8],
) -> rsa::Result<()> {
    // Pss::new binds the salt length to the digest length.
    match digest {
        MechDigest::Sha1 => key.verify(Pss::new::<Sha1>(), hashed, signature),
        MechDigest::Sha224 => key.verify(Pss::new::<Sha224>(), hashed, signature),
        MechDigest::Sha256 => key.verify(Pss::new::<Sha256>(), hashed, signature),
        MechDigest::Sha384 => key.verify(Pss::new::<Sha384>(), hashed, signature),
        MechDigest::Sha512 => key.verify(Pss::new::<Sha512>(), hashed, signature),
    }
}

fn verify_with_key(
    key: &Object,
    scheme: VerifyScheme,
    input: &[u8],
    signature: &[u8],
) -> Result<()> {
    match (key.public_key(), scheme) {
        (PublicKeyMaterial::Rsa(pk), scheme) => {
            if signature.len() != pk.size() {
                return Err(Error::SignatureLenRange);
            }
            let res = match scheme {
                VerifyScheme::Pkcs1(digest) => rsa_verify_pkcs1(pk, digest, input, signature),
                VerifyScheme::Pss(digest) => rsa_verify_pss(pk, digest, input, signature),
                VerifyScheme::RawPkcs1 => {
                    key_verify_unprefixed(pk, input, signature)
                }
                VerifyScheme::Ecdsa => return Err(Error::GeneralError),
            };
            res.map_err(|_| Error::SignatureInvalid)
        }
        (PublicKeyMaterial::P256(vk), VerifyScheme::Ecdsa) => {
            if signature.len() != 64 {
                return Err(Error::SignatureLenRange);
            }
            let sig = p256::ecdsa::Signature::from_slice(signature)
                .map_err(|_| Error::SignatureInvalid)?;
            vk.verify_prehash(input, &sig)
                .map_err(|_| Error::SignatureInvalid)
        }
        (PublicKeyMaterial::P384(vk), VerifyScheme::Ecdsa) => {
            if signature.len() != 96 {
                return Err(Error::SignatureLenRange);
            }
            let sig = p384::ecdsa::Signature::from_slice(signature)
                .map_err(|_| Error::SignatureInvalid)?;
            vk.verify_prehash(input, &sig)
                .map_err(|_| Error::SignatureInvalid)
        }
        _ => Err(Error::GeneralError),
    }
}

fn key_verify_unprefixed(
    key: &rsa::RsaPublicKey,
    input: &[u8],
    signature: &[u8],
) -> rsa::Result<()> {
    key.verify(Pkcs1v15Sign::new_unprefixed(), input, signature)
}

/// Digesting verifier: hash locally, then check the signature over the
/// digest.
pub struct DigestVerifyCtx {
    state: OpCtxState,
    hasher: Hasher,
    key: Arc<Object>,
    scheme: VerifyScheme,
}

impl VerifyCtx for DigestVerifyCtx {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        self.enter_state(OpCtxState::MultipartActive)?;
        self.hasher.update(data);
        Ok(())
    }

    fn verify(mut self: Box<Self>, data: &[u8], signature: &[u8]) -> Result<()> {
        self.enter_state(OpCtxState::SinglepartActive)?;
        let DigestVerifyCtx {
            mut hasher,
            key,
            scheme,
            ..
        } = *self;
        hasher.update(data);
        verify_with_key(&key, scheme, &hasher.finish(), signature)
    }

    fn finalize(mut self: Box<Self>, signature: &[u8]) -> Result<()> {
        self.enter_state(OpCtxState::MultipartReady)?;
        let DigestVerifyCtx {
            hasher, key, scheme, ..
        } = *self;
        verify_with_key(&key, scheme, &hasher.finish(), signature)
    }

    fn enter_state(&mut self, state: OpCtxState) -> Result<()> {
        enter_state(&mut self.state, state)
    }
}

/// Pre-digested verifier: single-shot, input validated against the
/// algorithm's bound digest.
pub struct PreDigestVerifyCtx {
    key: Arc<Object>,
    scheme: VerifyScheme,
    input: PreDigestInput,
    bound_digest: MechDigest,
}

impl VerifyCtx for PreDigestVerifyCtx {
    fn update(&mut self, _data: &[u8]) -> Result<()> {
        Err(Error::OperationActive)
    }

    fn verify(self: Box<Self>, data: &[u8], signature: &[u8]) -> Result<()> {
        let digest = match self.input {
            PreDigestInput::RawDigest => {
                if data.len() != self.bound_digest.len() {
                    return Err(Error::DataLenRange);
                }
                data.to_vec()
            }
            PreDigestInput::DigestInfo => strip_digest_info(self.bound_digest, data)?,
        };
        verify_with_key(&self.key, self.scheme, &digest, signature)
    }

    fn finalize(self: Box<Self>, _signature: &[u8]) -> Result<()> {
        Err(Error::OperationActive)
    }

    fn enter_state(&mut self, state: OpCtxState) -> Result<()> {
        enter_single_part_state(state)
    }
}

/// Raw PKCS#1 verifier: the caller supplies the full padded-block input.
pub struct RawPkcs1VerifyCtx {
    key: Arc<Object>,
}

impl VerifyCtx for RawPkcs1VerifyCtx {
    fn update(&mut self, _data: &[u8]) -> Result<()> {
        Err(Error::OperationActive)
    }

    fn verify(self: Box<Self>, data: &[u8], signature: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::DataLenRange);
        }
        verify_with_key(&self.key, VerifyScheme::RawPkcs1, data, signature)
    }

    fn finalize(self: Box<Self>, _signature: &[u8]) -> Result<()> {
        Err(Error::OperationActive)
    }

    fn enter_state(&mut self, state: OpCtxState) -> Result<()> {
        enter_single_part_state(state)
    }
}

/// Construct the verification context for a validated (mechanism, key)
/// pair.
pub fn new_verify_ctx(mech: &Mechanism, key: Arc<Object>) -> Result<Box<dyn VerifyCtx>> {
    let details = key.algorithm();
    let raw_rsa = details.curve.is_none() && details.digest.is_none();
    let bound_digest = details.digest.map(MechDigest::from_wire);

    match mech {
        Mechanism::RsaPkcs(Some(digest)) => Ok(Box::new(DigestVerifyCtx {
            state: OpCtxState::Initialized,
            hasher: Hasher::new(*digest),
            key,
            scheme: VerifyScheme::Pkcs1(*digest),
        })),
        Mechanism::RsaPkcsPss(Some(digest), _) => Ok(Box::new(DigestVerifyCtx {
            state: OpCtxState::Initialized,
            hasher: Hasher::new(*digest),
            key,
            scheme: VerifyScheme::Pss(*digest),
        })),
        Mechanism::Ecdsa(Some(digest)) => Ok(Box::new(DigestVerifyCtx {
            state: OpCtxState::Initialized,
            hasher: Hasher::new(*digest),
            key,
            scheme: VerifyScheme::Ecdsa,
        })),
        Mechanism::RsaPkcs(None) if raw_rsa => Ok(Box::new(RawPkcs1VerifyCtx { key })),
        Mechanism::RsaPkcs(None) => {
            let digest = bound_digest.ok_or(Error::GeneralError)?;
            Ok(Box::new(PreDigestVerifyCtx {
                key,
                scheme: VerifyScheme::Pkcs1(digest),
                input: PreDigestInput::DigestInfo,
                bound_digest: digest,
            }))
        }
        Mechanism::RsaPkcsPss(None, _) => {
            let digest = bound_digest.ok_or(Error::GeneralError)?;
            Ok(Box::new(PreDigestVerifyCtx {
                key,
                scheme: VerifyScheme::Pss(digest),
                input: PreDigestInput::RawDigest,
                bound_digest: digest,
            }))
        }
        Mechanism::Ecdsa(None) => {
            let digest = bound_digest.ok_or(Error::GeneralError)?;
            Ok(Box::new(PreDigestVerifyCtx {
                key,
                scheme: VerifyScheme::Ecdsa,
                input: PreDigestInput::RawDigest,
                bound_digest: digest,
            }))
        }
        Mechanism::Digest(_) | Mechanism::RsaPkcsOaep(_) => Err(Error::MechanismInvalid),
    }
}
