//! Digest algorithms used to hash requests, checkpoints and the
//! rolling chain digest.

#[cfg(feature = "crypto_hash_ring_sha2")]
pub mod ring_sha2;

#[cfg(feature = "crypto_hash_blake3_blake3")]
pub mod blake3_blake3;

#[cfg(feature = "crypto_hash_blake3_blake3")]
pub use self::blake3_blake3::{Context, Digest};

#[cfg(all(feature = "crypto_hash_ring_sha2", not(feature = "crypto_hash_blake3_blake3")))]
pub use self::ring_sha2::{Context, Digest};
