use std::sync::Arc;

use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::Oaep;
use sha2::{Sha256, Sha512};

use super::{enter_single_part_state, OpCtxState};
use crate::backend::mech::{MechDigest, Mechanism};
use crate::backend::object::{Object, PublicKeyMaterial};
use crate::{Error, Result};

/// Encryption context. RSA-OAEP is performed locally with the cached
/// public key; no remote call is made. Single-shot only.
pub trait EncryptCtx: Send {
    fn encrypt(self: Box<Self>, data: &[u8]) -> Result<Vec<u8>>;
    fn output_length(&self) -> usize;
    fn enter_state(&mut self, state: OpCtxState) -> Result<()>;
}

pub struct OaepEncryptCtx {
    key: Arc<Object>,
    digest: MechDigest,
}

impl EncryptCtx for OaepEncryptCtx {
    fn encrypt(self: Box<Self>, data: &[u8]) -> Result<Vec<u8>> {
        let pk = match self.key.public_key() {
            PublicKeyMaterial::Rsa(pk) => pk,
            _ => return Err(Error::GeneralError),
        };
        let padding = match self.digest {
            MechDigest::Sha256 => Oaep::new::<Sha256>(),
            MechDigest::Sha512 => Oaep::new::<Sha512>(),
            _ => return Err(Error::MechanismInvalid),
        };
        pk.encrypt(&mut OsRng, padding, data).map_err(|e| match e {
            rsa::Error::MessageTooLong => Error::DataLenRange,
            _ => {
                error!("OAEP encryption failed: {:?}", e);
                Error::GeneralError
            }
        })
    }

    fn output_length(&self) -> usize {
        match self.key.public_key() {
            PublicKeyMaterial::Rsa(pk) => pk.size(),
            _ => 0,
        }
    }

    fn enter_state(&mut self, state: OpCtxState) -> Result<()> {
        enter_single_part_state(state)
    }
}

/// Construct the encryption context for a validated (mechanism, key) pair.
pub fn new_encrypt_ctx(mech: &Mechanism, key: Arc<Object>) -> Result<Box<dyn EncryptCtx>> {
    match mech {
        Mechanism::RsaPkcsOaep(_) => {
            let digest = key
                .algorithm()
                .digest
                .map(MechDigest::from_wire)
                .ok_or(Error::MechanismInvalid)?;
            Ok(Box::new(OaepEncryptCtx { key, digest }))
        }
        _ => Err(Error::MechanismInvalid),
    }
}
