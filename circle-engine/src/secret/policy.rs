//! Fail-fast security invariants.
//!
//! Violations here are programming errors, not bad input. They are logged
//! and then panic; callers never get a chance to swallow them.

use std::fmt;

use subtle::ConstantTimeEq;

use crate::nostr::KIND_WELCOME;

/// A broken secret-handling invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyViolation {
    /// The Nostr identity key was offered as an MLS signing key.
    IdentityKeyReuse,
    /// Something tried to sign a kind 444 Welcome.
    SignedWelcome,
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdentityKeyReuse => f.write_str("identity key used as MLS signing key"),
            Self::SignedWelcome => f.write_str("attempted to sign a kind 444 Welcome"),
        }
    }
}

/// Logs and panics.
#[track_caller]
pub fn fail_fast(violation: PolicyViolation) -> ! {
    log::error!("secret policy violation: {violation}");
    panic!("secret policy violation: {violation}");
}

/// Panics if an MLS signing key equals the identity key.
#[track_caller]
pub fn ensure_key_separation(identity_pubkey: &[u8; 32], signing_pubkey: &[u8; 32]) {
    if bool::from(identity_pubkey.ct_eq(signing_pubkey)) {
        fail_fast(PolicyViolation::IdentityKeyReuse);
    }
}

/// Panics if `kind` is a Welcome. Every signing path calls this first.
#[track_caller]
pub fn ensure_unsigned_kind(kind: u16) {
    if kind == KIND_WELCOME {
        fail_fast(PolicyViolation::SignedWelcome);
    }
}
