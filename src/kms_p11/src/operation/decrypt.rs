use std::sync::Arc;

use kms_rpc::api::{AsymmetricDecryptRequest, KmsClient};

use super::{enter_single_part_state, OpCtxState};
use crate::backend::mech::Mechanism;
use crate::backend::object::Object;
use crate::{Error, Result};

/// Decryption context. RSA-OAEP only; the ciphertext ships to the KMS.
/// Single-shot only.
///
/// The plaintext length is not knowable locally, so the length-probe path
/// performs the remote call once and caches the plaintext; the producing
/// call then writes the cached bytes. This keeps the two-call convention
/// bit-exact without a second KMS round trip.
pub trait DecryptCtx: Send {
    fn required_length(&mut self, data: &[u8]) -> Result<usize>;
    fn decrypt(self: Box<Self>, data: &[u8]) -> Result<Vec<u8>>;
    fn enter_state(&mut self, state: OpCtxState) -> Result<()>;
}

pub struct OaepDecryptCtx {
    key: Arc<Object>,
    client: Arc<dyn KmsClient>,
    plaintext: Option<Vec<u8>>,
}

impl OaepDecryptCtx {
    fn fetch(&mut self, ciphertext: &[u8]) -> Result<()> {
        if self.plaintext.is_some() {
            return Ok(());
        }
        if ciphertext.len() != self.key.algorithm().key_bits as usize / 8 {
            return Err(Error::EncryptedDataLenRange);
        }
        let resp = self.client.asymmetric_decrypt(AsymmetricDecryptRequest {
            name: self.key.kms_key_name().to_string(),
            ciphertext_crc32c: Some(crc32c::crc32c(ciphertext)),
            ciphertext: ciphertext.to_vec(),
        })?;
        if !resp.verified_ciphertext_crc32c {
            error!("KMS did not acknowledge the request ciphertext checksum");
            return Err(Error::DeviceError);
        }
        if crc32c::crc32c(&resp.plaintext) != resp.plaintext_crc32c {
            error!("plaintext checksum mismatch in KMS response");
            return Err(Error::DeviceError);
        }
        self.plaintext = Some(resp.plaintext);
        Ok(())
    }
}

impl DecryptCtx for OaepDecryptCtx {
    fn required_length(&mut self, data: &[u8]) -> Result<usize> {
        self.fetch(data)?;
        // fetch() always leaves a cached plaintext behind on success.
        Ok(self.plaintext.as_ref().map(Vec::len).unwrap_or(0))
    }

    fn decrypt(mut self: Box<Self>, data: &[u8]) -> Result<Vec<u8>> {
        self.fetch(data)?;
        Ok(self.plaintext.take().unwrap_or_default())
    }

    fn enter_state(&mut self, state: OpCtxState) -> Result<()> {
        enter_single_part_state(state)
    }
}

/// Construct the decryption context for a validated (mechanism, key) pair.
pub fn new_decrypt_ctx(
    mech: &Mechanism,
    key: Arc<Object>,
    client: Arc<dyn KmsClient>,
) -> Result<Box<dyn DecryptCtx>> {
    match mech {
        Mechanism::RsaPkcsOaep(_) => Ok(Box::new(OaepDecryptCtx {
            key,
            client,
            plaintext: None,
        })),
        _ => Err(Error::MechanismInvalid),
    }
}
