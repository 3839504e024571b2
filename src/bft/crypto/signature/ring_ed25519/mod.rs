use ring::rand::SystemRandom;
use ring::signature::{self, Ed25519KeyPair, KeyPair as _};

use crate::bft::error::*;

pub struct KeyPair(Ed25519KeyPair);

#[derive(Clone)]
pub struct PublicKey(Vec<u8>);

#[derive(Clone)]
pub struct Signature([u8; Signature::LENGTH]);

impl Signature {
    pub const LENGTH: usize = 64;

    pub fn from_bytes(raw_bytes: &[u8]) -> Result<Self> {
        if raw_bytes.len() < Self::LENGTH {
            return Err("signature has an invalid length")
                .wrapped(ErrorKind::Crypto);
        }
        let mut inner = [0; Self::LENGTH];
        inner.copy_from_slice(&raw_bytes[..Self::LENGTH]);
        Ok(Self(inner))
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl KeyPair {
    pub fn from_bytes(raw_bytes: &[u8]) -> Result<Self> {
        Ed25519KeyPair::from_pkcs8(raw_bytes)
            .map(KeyPair)
            .simple(ErrorKind::Crypto)
    }

    pub fn generate_pkcs8() -> Result<Vec<u8>> {
        let rng = SystemRandom::new();
        Ed25519KeyPair::generate_pkcs8(&rng)
            .simple(ErrorKind::Crypto)
            .map(|doc| doc.as_ref().to_vec())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public_key().as_ref().to_vec())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.0.sign(message);
        let mut inner = [0; Signature::LENGTH];
        inner.copy_from_slice(sig.as_ref());
        Signature(inner)
    }
}

impl PublicKey {
    pub fn from_bytes(raw_bytes: &[u8]) -> Self {
        PublicKey(raw_bytes.to_vec())
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let key = signature::UnparsedPublicKey::new(&signature::ED25519, &self.0);
        key.verify(message, signature.as_ref())
            .simple(ErrorKind::MalformedMessage)
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let pkcs8 = KeyPair::generate_pkcs8().unwrap();
        let kp = KeyPair::from_bytes(&pkcs8).unwrap();
        let pk = kp.public_key();
        let sig = kp.sign(b"replica vote");
        assert!(pk.verify(b"replica vote", &sig).is_ok());
        assert!(pk.verify(b"tampered", &sig).is_err());
    }
}
