// Copyright 2020-2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Operation pipelines: one context type per (mechanism shape, direction),
//! each single-use. Sign and decrypt ship to the KMS; verify, encrypt and
//! digest are strictly local against cached public key material.

pub mod decrypt;
pub mod digest;
pub mod encrypt;
pub mod sign;
pub mod verify;

pub use decrypt::{DecryptCtx, OaepDecryptCtx};
pub use digest::DigestCtx;
pub use encrypt::{EncryptCtx, OaepEncryptCtx};
pub use sign::SignCtx;
pub use verify::VerifyCtx;

use crate::{Error, Result};

/// Operation context state. Tracked so that misbehaving applications
/// cannot interleave the single-part and multi-part call flows
/// (e.g. SignInit -> Sign -> SignUpdate).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpCtxState {
    Initialized,
    SinglepartActive,
    MultipartActive,
    MultipartReady,
}

/// Advance a context's state machine, rejecting cross-flow transitions.
pub(crate) fn enter_state(current: &mut OpCtxState, next: OpCtxState) -> Result<()> {
    let allowed = match (*current, next) {
        (OpCtxState::Initialized, _) => true,
        (OpCtxState::SinglepartActive, OpCtxState::SinglepartActive) => true,
        (OpCtxState::MultipartActive, OpCtxState::MultipartActive) => true,
        (OpCtxState::MultipartActive, OpCtxState::MultipartReady) => true,
        (OpCtxState::MultipartReady, OpCtxState::MultipartReady) => true,
        _ => false,
    };
    if !allowed {
        return Err(Error::OperationActive);
    }
    *current = next;
    Ok(())
}

/// State entry for contexts that only support the single-part flow.
pub(crate) fn enter_single_part_state(next: OpCtxState) -> Result<()> {
    match next {
        OpCtxState::SinglepartActive => Ok(()),
        _ => Err(Error::OperationActive),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_then_multi_is_rejected() {
        let mut state = OpCtxState::Initialized;
        enter_state(&mut state, OpCtxState::SinglepartActive).unwrap();
        assert_eq!(
            enter_state(&mut state, OpCtxState::MultipartActive),
            Err(Error::OperationActive)
        );
    }

    #[test]
    fn multi_part_flow_progresses() {
        let mut state = OpCtxState::Initialized;
        enter_state(&mut state, OpCtxState::MultipartActive).unwrap();
        enter_state(&mut state, OpCtxState::MultipartActive).unwrap();
        enter_state(&mut state, OpCtxState::MultipartReady).unwrap();
        assert_eq!(
            enter_state(&mut state, OpCtxState::MultipartActive),
            Err(Error::OperationActive)
        );
    }
}
