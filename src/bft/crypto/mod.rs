//! Cryptographic primitives: digests and digital signatures.
//!
//! The protocol components never call into `ring`/`blake3` directly;
//! they go through the [`SignatureService`] trait, so the signature
//! scheme (and, for tests, a no-op stand-in) can be swapped without
//! touching `commitment`, `checkpoint` or `view_change`.

pub mod hash;
pub mod signature;

use crate::bft::communication::NodeId;
use crate::bft::error::*;
pub use hash::Digest;
pub use signature::Signature;

/// A signature together with the identity of the replica that produced it.
#[derive(Clone)]
pub struct SignatureInfo {
    pub node: NodeId,
    pub signature: Signature,
}

/// External collaborator responsible for signing outgoing messages and
/// verifying signatures on incoming ones, and for computing the digests
/// used throughout the protocol (request hashes, checkpoint digests,
/// the rolling chain digest).
///
/// Out of scope: key management, key distribution, rotation. A
/// `SignatureService` implementation is handed a keypair/verifier set
/// at construction time and is otherwise a pure function of its inputs.
pub trait SignatureService: Send + Sync {
    /// Hash an arbitrary byte string.
    fn hash(&self, data: &[u8]) -> Digest;

    /// Sign `data` as this replica.
    fn sign(&self, data: &[u8]) -> Signature;

    /// Verify that `signature` over `data` was produced by `node`.
    fn verify(&self, node: NodeId, data: &[u8], signature: &Signature) -> Result<()>;
}
