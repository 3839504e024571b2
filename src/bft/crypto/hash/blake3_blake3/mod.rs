use crate::bft::error::*;

pub struct Context(blake3::Hasher);

#[derive(Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Digest([u8; Digest::LENGTH]);

impl Context {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finish(self) -> Digest {
        Digest::from_bytes_unchecked(self.0.finalize().as_bytes())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Digest {
    pub const LENGTH: usize = 32;

    pub fn from_bytes(raw_bytes: &[u8]) -> Result<Self> {
        if raw_bytes.len() < Self::LENGTH {
            return Err("digest has an invalid length")
                .wrapped(ErrorKind::Crypto);
        }
        Ok(Self::from_bytes_unchecked(raw_bytes))
    }

    fn from_bytes_unchecked(raw_bytes: &[u8]) -> Self {
        let mut inner = [0; Self::LENGTH];
        inner.copy_from_slice(&raw_bytes[..Self::LENGTH]);
        Self(inner)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for Digest {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Digest {}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_same_digest() {
        let mut a = Context::new();
        a.update(b"hello");
        let mut b = Context::new();
        b.update(b"hello");
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn different_input_different_digest() {
        let mut a = Context::new();
        a.update(b"hello");
        let mut b = Context::new();
        b.update(b"world");
        assert_ne!(a.finish(), b.finish());
    }
}
