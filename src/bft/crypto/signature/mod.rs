//! Digital signatures binding a replica identity to a message digest.

#[cfg(feature = "crypto_signature_ring_ed25519")]
pub mod ring_ed25519;

#[cfg(feature = "crypto_signature_ring_ed25519")]
pub use self::ring_ed25519::{KeyPair, PublicKey, Signature};
