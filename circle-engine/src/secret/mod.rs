//! Secret lifecycle management.
//!
//! Everything that holds key material on behalf of the engine lives here:
//!
//! - [`SecretBytes`]: owned, move-only 32-byte secrets that wipe on drop
//! - [`SessionContext`]: the explicit per-login context (identity + storage key)
//! - [`Keyring`]: the platform keyring seam for the storage encryption key
//! - [`EpochSecretRing`]: per-group exporter secrets with bounded retention
//! - [`policy`]: fail-fast checks for key separation and unsigned Welcomes
//!
//! # Security
//!
//! No secret type in this module implements `Clone`. Copies are made
//! explicitly through `duplicate()` or scoped through
//! [`SecretBytes::expose_scoped`], which wipes its temporary on every exit path.

mod buffer;
mod error;
mod keyring;
pub mod policy;
mod ring;
mod session;

pub use buffer::{SecretBytes, SECRET_LEN};
pub use error::{Result, SecretError};
#[cfg(any(test, feature = "test-utils"))]
pub use keyring::MemoryKeyring;
pub use keyring::{Keyring, STORAGE_KEY_ENTRY};
pub use policy::PolicyViolation;
pub use ring::{EpochScoped, EpochSecretRing, ExporterSecret, DEFAULT_EXPORTER_RETENTION_EPOCHS};
pub use session::SessionContext;
