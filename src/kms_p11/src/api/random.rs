use rand::RngCore;

use super::session_arc;
use crate::ck;
use crate::{Error, Result};

/// See PKCS#11 v2.40 Section 5.14 Random number generation functions.
/// Randomness comes from the process CSPRNG; the remote device has no
/// RNG surface to forward to.

pub fn generate_random(session: ck::CK_SESSION_HANDLE, out: &mut [u8]) -> Result<()> {
    trace!("generate_random() called, len={}", out.len());

    let _sarc = session_arc(session)?;
    rand::thread_rng().fill_bytes(out);
    Ok(())
}

pub fn seed_random(session: ck::CK_SESSION_HANDLE, _seed: &[u8]) -> Result<()> {
    trace!("seed_random() called");

    let _sarc = session_arc(session)?;
    Err(Error::RandomSeedNotSupported)
}
