use sha1::Sha1;
use sha2::digest::Digest as _;
use sha2::{Sha224, Sha256, Sha384, Sha512};

use super::{enter_state, OpCtxState};
use crate::backend::mech::MechDigest;
use crate::Result;

/// Plain digest accumulator shared by the digest pipeline and the
/// digesting sign/verify contexts.
pub(crate) enum Hasher {
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    pub fn new(digest: MechDigest) -> Self {
        match digest {
            MechDigest::Sha1 => Self::Sha1(Sha1::new()),
            MechDigest::Sha224 => Self::Sha224(Sha224::new()),
            MechDigest::Sha256 => Self::Sha256(Sha256::new()),
            MechDigest::Sha384 => Self::Sha384(Sha384::new()),
            MechDigest::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha224(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    pub fn finish(self) -> Vec<u8> {
        match self {
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha224(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Message digest context. Each session can have one active digest
/// context at a time; it is consumed by Final or the single-shot call.
pub struct DigestCtx {
    state: OpCtxState,
    digest: MechDigest,
    hasher: Hasher,
}

impl DigestCtx {
    pub fn new(digest: MechDigest) -> Self {
        Self {
            state: OpCtxState::Initialized,
            digest,
            hasher: Hasher::new(digest),
        }
    }

    pub fn len(&self) -> usize {
        self.digest.len()
    }

    pub fn enter_state(&mut self, next: OpCtxState) -> Result<()> {
        enter_state(&mut self.state, next)
    }

    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        self.enter_state(OpCtxState::MultipartActive)?;
        self.hasher.update(data);
        Ok(())
    }

    pub fn finalize(mut self) -> Result<Vec<u8>> {
        self.enter_state(OpCtxState::MultipartReady)?;
        Ok(self.hasher.finish())
    }

    pub fn digest(mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.enter_state(OpCtxState::SinglepartActive)?;
        self.hasher.update(data);
        Ok(self.hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn single_and_multi_part_agree() {
        let single = DigestCtx::new(MechDigest::Sha256)
            .digest(b"hello world")
            .unwrap();

        let mut ctx = DigestCtx::new(MechDigest::Sha256);
        ctx.update(b"hello ").unwrap();
        ctx.update(b"world").unwrap();
        assert_eq!(ctx.finalize().unwrap(), single);
        assert_eq!(single.len(), 32);
    }

    #[test]
    fn update_after_single_shot_state_is_rejected() {
        let mut ctx = DigestCtx::new(MechDigest::Sha1);
        ctx.enter_state(OpCtxState::SinglepartActive).unwrap();
        assert_eq!(ctx.update(b"data"), Err(Error::OperationActive));
    }

    #[test]
    fn lengths_match_mechanism() {
        for (digest, len) in [
            (MechDigest::Sha1, 20),
            (MechDigest::Sha224, 28),
            (MechDigest::Sha256, 32),
            (MechDigest::Sha384, 48),
            (MechDigest::Sha512, 64),
        ] {
            assert_eq!(DigestCtx::new(digest).len(), len);
            assert_eq!(DigestCtx::new(digest).digest(b"x").unwrap().len(), len);
        }
    }
}
