//! Property-based tests for per-epoch secret retention.

use circle_engine::secret::{EpochScoped, EpochSecretRing, SecretBytes};
use proptest::prelude::*;

struct EpochKey {
    epoch: u64,
    key: SecretBytes,
}

impl EpochScoped for EpochKey {
    fn epoch(&self) -> u64 {
        self.epoch
    }

    fn duplicate(&self) -> Self {
        Self {
            epoch: self.epoch,
            key: self.key.duplicate(),
        }
    }
}

fn ring_after(retention: u64, epochs: u64) -> EpochSecretRing<EpochKey> {
    let mut ring = EpochSecretRing::new(
        retention,
        EpochKey {
            epoch: 0,
            key: SecretBytes::random(),
        },
    );
    for epoch in 1..=epochs {
        ring.advance(EpochKey {
            epoch,
            key: SecretBytes::random(),
        });
    }
    ring
}

proptest! {
    /// Exactly the current epoch and the `retention` epochs before it are kept.
    #[test]
    fn keeps_exactly_the_window(retention in 0u64..6, epochs in 0u64..30) {
        let ring = ring_after(retention, epochs);

        let kept: Vec<u64> = ring.iter_newest_first().map(EpochScoped::epoch).collect();
        let expected: Vec<u64> = (epochs.saturating_sub(retention)..=epochs).rev().collect();
        prop_assert_eq!(kept, expected);

        for epoch in 0..=epochs {
            let in_window = epoch + retention >= epochs;
            prop_assert_eq!(ring.get(epoch).is_some(), in_window);
        }
    }

    /// Advancing a copy leaves the original untouched.
    #[test]
    fn advanced_copy_is_independent(retention in 0u64..4, epochs in 0u64..10) {
        let ring = ring_after(retention, epochs);
        let next = ring.advanced(EpochKey {
            epoch: epochs + 1,
            key: SecretBytes::random(),
        });

        prop_assert_eq!(ring.current().epoch(), epochs);
        prop_assert_eq!(next.current().epoch(), epochs + 1);
        prop_assert!(ring.current().key.ct_eq(&next.get(epochs).unwrap().key));
    }
}
