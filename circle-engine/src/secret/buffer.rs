//! Owned, zeroizing secret buffers.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Length in bytes of every secret handled by the engine.
pub const SECRET_LEN: usize = 32;

/// A 32-byte secret that is wiped when dropped.
///
/// `SecretBytes` is deliberately not `Clone` or `Copy`. Use
/// [`Self::duplicate`] when a second owner is genuinely required, and
/// [`Self::expose_scoped`] when a library needs an owned array.
///
/// # Example
///
/// ```
/// use circle_engine::secret::SecretBytes;
///
/// let secret = SecretBytes::random();
/// let first = secret.expose_scoped(|bytes| bytes[0]);
/// assert_eq!(first, secret.expose_scoped(|bytes| bytes[0]));
/// ```
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes([u8; SECRET_LEN]);

impl SecretBytes {
    /// Generates a fresh secret from the OS random number generator.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Takes ownership of an array, wiping the caller's copy.
    #[must_use]
    pub fn from_array(bytes: &mut [u8; SECRET_LEN]) -> Self {
        let secret = Self(*bytes);
        bytes.zeroize();
        secret
    }

    /// Copies a slice into a new secret.
    ///
    /// Returns `None` if the slice is not exactly 32 bytes.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; SECRET_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Makes an explicit second owner of this secret.
    #[must_use]
    pub const fn duplicate(&self) -> Self {
        Self(self.0)
    }

    /// Runs `f` over a temporary copy of the secret.
    ///
    /// The copy lives in a [`Zeroizing`] guard, so it is wiped whether `f`
    /// returns normally, returns an error, or unwinds.
    pub fn expose_scoped<R>(&self, f: impl FnOnce(&[u8; SECRET_LEN]) -> R) -> R {
        let copy = Zeroizing::new(self.0);
        f(&copy)
    }

    /// Borrows the secret bytes without copying.
    pub(crate) const fn expose(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }

    /// Constant-time equality.
    #[must_use]
    pub fn ct_eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBytes([REDACTED])")
    }
}

impl Serialize for SecretBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = Zeroizing::new(hex::encode(self.0));
        serializer.serialize_str(&encoded)
    }
}

impl<'de> Deserialize<'de> for SecretBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = Zeroizing::new(String::deserialize(deserializer)?);
        let mut bytes = Zeroizing::new([0u8; SECRET_LEN]);
        hex::decode_to_slice(encoded.as_bytes(), &mut *bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(*bytes))
    }
}
