use std::sync::Arc;

use kms_rpc::api::{AsymmetricSignRequest, Digest, KmsClient};

use super::digest::Hasher;
use super::{enter_single_part_state, enter_state, OpCtxState};
use crate::backend::algorithm::EcCurve;
use crate::backend::mech::{MechDigest, Mechanism};
use crate::backend::object::Object;
use crate::{Error, Result};

/// PKCS#1 v1.5 type-1 padding overhead: 0x00 0x01, at least eight 0xff
/// bytes, 0x00.
const RSA_PKCS1_OVERHEAD: usize = 11;

/// Signing context. Consumed by the single-shot call or by Final.
pub trait SignCtx: Send {
    fn update(&mut self, data: &[u8]) -> Result<()>;
    fn sign(self: Box<Self>, data: &[u8]) -> Result<Vec<u8>>;
    fn finalize(self: Box<Self>) -> Result<Vec<u8>>;
    fn signature_length(&self) -> usize;
    fn enter_state(&mut self, state: OpCtxState) -> Result<()>;
}

/// DER DigestInfo prefixes for the EMSA-PKCS1-v1_5 encoding.
fn digest_info_prefix(digest: MechDigest) -> &'static [u8] {
    match digest {
        MechDigest::Sha1 => &[
            0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04,
            0x14,
        ],
        MechDigest::Sha224 => &[
            0x30, 0x2d, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x04, 0x05, 0x00, 0x04, 0x1c,
        ],
        MechDigest::Sha256 => &[
            0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x01, 0x05, 0x00, 0x04, 0x20,
        ],
        MechDigest::Sha384 => &[
            0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x02, 0x05, 0x00, 0x04, 0x30,
        ],
        MechDigest::Sha512 => &[
            0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x03, 0x05, 0x00, 0x04, 0x40,
        ],
    }
}

pub(crate) fn encode_digest_info(digest: MechDigest, hash: &[u8]) -> Vec<u8> {
    let mut out = digest_info_prefix(digest).to_vec();
    out.extend_from_slice(hash);
    out
}

/// Validate a caller-supplied DigestInfo block and return the bare hash.
pub(crate) fn strip_digest_info(digest: MechDigest, data: &[u8]) -> Result<Vec<u8>> {
    let prefix = digest_info_prefix(digest);
    if data.len() != prefix.len() + digest.len() || !data.starts_with(prefix) {
        return Err(Error::DataInvalid);
    }
    Ok(data[prefix.len()..].to_vec())
}

/// Re-encode a DER ECDSA signature into the fixed-width r||s form the
/// token API mandates, with both halves zero-padded to the coordinate
/// size.
fn ecdsa_der_to_ckrs(curve: EcCurve, der: &[u8]) -> Result<Vec<u8>> {
    let out = match curve {
        EcCurve::P256 => p256::ecdsa::Signature::from_der(der).map(|s| s.to_bytes().to_vec()),
        EcCurve::P384 => p384::ecdsa::Signature::from_der(der).map(|s| s.to_bytes().to_vec()),
    };
    out.map_err(|e| {
        error!("undecodable ECDSA signature from KMS: {:?}", e);
        Error::DeviceError
    })
}

/// The remote half shared by every signing context: request construction
/// with integrity fields, response integrity verification, and signature
/// format fixup.
struct KmsSigner {
    key: Arc<Object>,
    client: Arc<dyn KmsClient>,
}

impl KmsSigner {
    fn signature_length(&self) -> usize {
        self.key.algorithm().signature_length
    }

    fn bound_digest(&self) -> Result<MechDigest> {
        self.key
            .algorithm()
            .digest
            .map(MechDigest::from_wire)
            .ok_or(Error::GeneralError)
    }

    fn ship_digest(&self, digest_bytes: Vec<u8>) -> Result<Vec<u8>> {
        let wire_digest = self.key.algorithm().digest.ok_or(Error::GeneralError)?;
        let digest_crc32c = Some(crc32c::crc32c(&digest_bytes));
        let resp = self.client.asymmetric_sign(AsymmetricSignRequest {
            name: self.key.kms_key_name().to_string(),
            digest: Some(Digest {
                algorithm: wire_digest,
                bytes: digest_bytes,
            }),
            digest_crc32c,
            data: Vec::new(),
            data_crc32c: None,
        })?;
        if !resp.verified_digest_crc32c {
            error!("KMS did not acknowledge the request digest checksum");
            return Err(Error::DeviceError);
        }
        self.check_signature(resp.signature, resp.signature_crc32c)
    }

    fn ship_data(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        let data_crc32c = Some(crc32c::crc32c(&data));
        let resp = self.client.asymmetric_sign(AsymmetricSignRequest {
            name: self.key.kms_key_name().to_string(),
            digest: None,
            digest_crc32c: None,
            data,
            data_crc32c,
        })?;
        if !resp.verified_data_crc32c {
            error!("KMS did not acknowledge the request data checksum");
            return Err(Error::DeviceError);
        }
        self.check_signature(resp.signature, resp.signature_crc32c)
    }

    fn check_signature(&self, signature: Vec<u8>, signature_crc32c: u32) -> Result<Vec<u8>> {
        if crc32c::crc32c(&signature) != signature_crc32c {
            error!("signature checksum mismatch in KMS response");
            return Err(Error::DeviceError);
        }
        let signature = match self.key.algorithm().curve {
            Some(curve) => ecdsa_der_to_ckrs(curve, &signature)?,
            None => signature,
        };
        if signature.len() != self.signature_length() {
            error!(
                "KMS signature has unexpected length {} (want {})",
                signature.len(),
                self.signature_length()
            );
            return Err(Error::DeviceError);
        }
        Ok(signature)
    }
}

/// Digesting signer: the mechanism names a raw data input; the input is
/// hashed locally and the digest shipped to the KMS.
pub struct DigestSignCtx {
    state: OpCtxState,
    hasher: Hasher,
    signer: KmsSigner,
}

impl SignCtx for DigestSignCtx {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        self.enter_state(OpCtxState::MultipartActive)?;
        self.hasher.update(data);
        Ok(())
    }

    fn sign(mut self: Box<Self>, data: &[u8]) -> Result<Vec<u8>> {
        self.enter_state(OpCtxState::SinglepartActive)?;
        let DigestSignCtx {
            mut hasher, signer, ..
        } = *self;
        hasher.update(data);
        signer.ship_digest(hasher.finish())
    }

    fn finalize(mut self: Box<Self>) -> Result<Vec<u8>> {
        self.enter_state(OpCtxState::MultipartReady)?;
        let DigestSignCtx { hasher, signer, .. } = *self;
        signer.ship_digest(hasher.finish())
    }

    fn signature_length(&self) -> usize {
        self.signer.signature_length()
    }

    fn enter_state(&mut self, state: OpCtxState) -> Result<()> {
        enter_state(&mut self.state, state)
    }
}

pub(crate) enum PreDigestInput {
    /// The caller supplies the bare digest (ECDSA, RSA-PSS).
    RawDigest,
    /// The caller supplies a DER DigestInfo block (CKM_RSA_PKCS).
    DigestInfo,
}

/// Pre-digested signer: single-shot only; the digest is validated against
/// the algorithm and shipped without local hashing.
pub struct PreDigestSignCtx {
    signer: KmsSigner,
    input: PreDigestInput,
}

impl SignCtx for PreDigestSignCtx {
    fn update(&mut self, _data: &[u8]) -> Result<()> {
        Err(Error::OperationActive)
    }

    fn sign(self: Box<Self>, data: &[u8]) -> Result<Vec<u8>> {
        let digest = self.signer.bound_digest()?;
        let digest_bytes = match self.input {
            PreDigestInput::RawDigest => {
                if data.len() != digest.len() {
                    return Err(Error::DataLenRange);
                }
                data.to_vec()
            }
            PreDigestInput::DigestInfo => strip_digest_info(digest, data)?,
        };
        self.signer.ship_digest(digest_bytes)
    }

    fn finalize(self: Box<Self>) -> Result<Vec<u8>> {
        Err(Error::OperationActive)
    }

    fn signature_length(&self) -> usize {
        self.signer.signature_length()
    }

    fn enter_state(&mut self, state: OpCtxState) -> Result<()> {
        enter_single_part_state(state)
    }
}

/// Raw PKCS#1 signer: the caller supplies the full to-be-padded block and
/// the KMS applies the type-1 envelope. Only the public modulus length is
/// needed locally, to bound the input.
pub struct RawPkcs1SignCtx {
    signer: KmsSigner,
}

impl SignCtx for RawPkcs1SignCtx {
    fn update(&mut self, _data: &[u8]) -> Result<()> {
        Err(Error::OperationActive)
    }

    fn sign(self: Box<Self>, data: &[u8]) -> Result<Vec<u8>> {
        let max_len = self.signer.signature_length() - RSA_PKCS1_OVERHEAD;
        if data.is_empty() || data.len() > max_len {
            return Err(Error::DataLenRange);
        }
        self.signer.ship_data(data.to_vec())
    }

    fn finalize(self: Box<Self>) -> Result<Vec<u8>> {
        Err(Error::OperationActive)
    }

    fn signature_length(&self) -> usize {
        self.signer.signature_length()
    }

    fn enter_state(&mut self, state: OpCtxState) -> Result<()> {
        enter_single_part_state(state)
    }
}

/// Digesting signer over a raw PKCS#1 key: hash locally, wrap in a
/// DigestInfo envelope, ship as raw data.
pub struct RawDigestInfoSignCtx {
    state: OpCtxState,
    digest: MechDigest,
    hasher: Hasher,
    signer: KmsSigner,
}

impl RawDigestInfoSignCtx {
    fn ship(digest: MechDigest, hasher: Hasher, signer: KmsSigner) -> Result<Vec<u8>> {
        signer.ship_data(encode_digest_info(digest, &hasher.finish()))
    }
}

impl SignCtx for RawDigestInfoSignCtx {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        self.enter_state(OpCtxState::MultipartActive)?;
        self.hasher.update(data);
        Ok(())
    }

    fn sign(mut self: Box<Self>, data: &[u8]) -> Result<Vec<u8>> {
        self.enter_state(OpCtxState::SinglepartActive)?;
        let RawDigestInfoSignCtx {
            digest,
            mut hasher,
            signer,
            ..
        } = *self;
        hasher.update(data);
        Self::ship(digest, hasher, signer)
    }

    fn finalize(mut self: Box<Self>) -> Result<Vec<u8>> {
        self.enter_state(OpCtxState::MultipartReady)?;
        let RawDigestInfoSignCtx {
            digest,
            hasher,
            signer,
            ..
        } = *self;
        Self::ship(digest, hasher, signer)
    }

    fn signature_length(&self) -> usize {
        self.signer.signature_length()
    }

    fn enter_state(&mut self, state: OpCtxState) -> Result<()> {
        enter_state(&mut self.state, state)
    }
}

/// Construct the signing context for a validated (mechanism, key) pair.
pub fn new_sign_ctx(
    mech: &Mechanism,
    key: Arc<Object>,
    client: Arc<dyn KmsClient>,
) -> Result<Box<dyn SignCtx>> {
    let details = key.algorithm();
    // RAW_PKCS1 algorithms bind no digest; everything else does.
    let raw_rsa = details.curve.is_none() && details.digest.is_none();
    let signer = KmsSigner { key, client };

    match mech {
        Mechanism::RsaPkcs(Some(digest)) if raw_rsa => Ok(Box::new(RawDigestInfoSignCtx {
            state: OpCtxState::Initialized,
            digest: *digest,
            hasher: Hasher::new(*digest),
            signer,
        })),
        Mechanism::RsaPkcs(Some(_)) | Mechanism::RsaPkcsPss(Some(_), _) => {
            let digest = signer.bound_digest()?;
            Ok(Box::new(DigestSignCtx {
                state: OpCtxState::Initialized,
                hasher: Hasher::new(digest),
                signer,
            }))
        }
        Mechanism::Ecdsa(Some(_)) => {
            let digest = signer.bound_digest()?;
            Ok(Box::new(DigestSignCtx {
                state: OpCtxState::Initialized,
                hasher: Hasher::new(digest),
                signer,
            }))
        }
        Mechanism::RsaPkcs(None) if raw_rsa => Ok(Box::new(RawPkcs1SignCtx { signer })),
        Mechanism::RsaPkcs(None) => Ok(Box::new(PreDigestSignCtx {
            signer,
            input: PreDigestInput::DigestInfo,
        })),
        Mechanism::RsaPkcsPss(None, _) | Mechanism::Ecdsa(None) => Ok(Box::new(PreDigestSignCtx {
            signer,
            input: PreDigestInput::RawDigest,
        })),
        Mechanism::Digest(_) | Mechanism::RsaPkcsOaep(_) => Err(Error::MechanismInvalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signature::hazmat::PrehashSigner;

    #[test]
    fn digest_info_roundtrip() {
        let hash = vec![0xabu8; 32];
        let encoded = encode_digest_info(MechDigest::Sha256, &hash);
        assert_eq!(encoded.len(), 19 + 32);
        assert_eq!(strip_digest_info(MechDigest::Sha256, &encoded).unwrap(), hash);
    }

    #[test]
    fn digest_info_rejects_wrong_digest() {
        let encoded = encode_digest_info(MechDigest::Sha256, &[0u8; 32]);
        assert_eq!(
            strip_digest_info(MechDigest::Sha512, &encoded),
            Err(Error::DataInvalid)
        );
        assert_eq!(
            strip_digest_info(MechDigest::Sha256, &encoded[..encoded.len() - 1]),
            Err(Error::DataInvalid)
        );
    }

    #[test]
    fn der_signature_reencodes_to_fixed_width() {
        let key = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let sig: p256::ecdsa::Signature = key.sign_prehash(&[0x42u8; 32]).unwrap();
        let der = sig.to_der();

        let ckrs = ecdsa_der_to_ckrs(EcCurve::P256, der.as_bytes()).unwrap();
        assert_eq!(ckrs.len(), 64);
        assert_eq!(ckrs, sig.to_bytes().to_vec());
    }

    #[test]
    fn garbage_der_signature_is_a_device_error() {
        assert_eq!(
            ecdsa_der_to_ckrs(EcCurve::P256, &[0x30, 0x02, 0x01, 0x00]),
            Err(Error::DeviceError)
        );
    }
}
