//! Deterministic A/B bucketing for the downsell experiment.

use sha2::{Digest, Sha256};
use tracing::trace;

use crate::error::{RetentionError, RetentionResult};
use crate::types::Arm;

/// Versioned salt mixed into every user id before hashing. Changing it
/// reshuffles the whole population.
pub const VARIANT_SALT: &str = "downsell_salt_2024";

/// Pure digest function used for bucketing.
pub type DigestFn = fn(&[u8]) -> Vec<u8>;

/// SHA-256, the default bucketing digest.
pub fn sha256_digest(input: &[u8]) -> Vec<u8> {
    Sha256::digest(input).to_vec()
}

/// Maps user ids onto the two experiment arms.
///
/// The arm is the parity of the first 32 bits (big-endian) of
/// `digest(user_id ++ salt)`: even is `A`, odd is `B`. A cryptographic
/// digest keeps the split uniform and impossible to steer by picking ids.
#[derive(Debug, Clone, Copy)]
pub struct VariantAssigner {
    salt: &'static str,
    digest: DigestFn,
}

impl VariantAssigner {
    pub fn new() -> Self {
        Self {
            salt: VARIANT_SALT,
            digest: sha256_digest,
        }
    }

    /// Replace the digest function, e.g. with a fixed stub in tests.
    pub fn with_digest(mut self, digest: DigestFn) -> Self {
        self.digest = digest;
        self
    }

    pub fn salt(&self) -> &'static str {
        self.salt
    }

    pub fn assign(&self, user_id: &str) -> RetentionResult<Arm> {
        if user_id.trim().is_empty() {
            return Err(RetentionError::InvalidInput(
                "user id must not be empty".to_string(),
            ));
        }

        let mut input = Vec::with_capacity(user_id.len() + self.salt.len());
        input.extend_from_slice(user_id.as_bytes());
        input.extend_from_slice(self.salt.as_bytes());
        let digest = (self.digest)(&input);

        let bucket = digest
            .iter()
            .take(4)
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
        let arm = if bucket % 2 == 0 { Arm::A } else { Arm::B };

        trace!(
            prefix = %hex::encode(&digest[..digest.len().min(4)]),
            arm = %arm,
            "bucketed user"
        );
        Ok(arm)
    }
}

impl Default for VariantAssigner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    #[test]
    fn test_known_assignments() {
        let assigner = VariantAssigner::new();
        // sha256("user-1downsell_salt_2024") starts with 231c0d24 (even)
        assert_eq!(assigner.assign("user-1").unwrap(), Arm::A);
        // 26f4d4a7 (odd)
        assert_eq!(assigner.assign("user-2").unwrap(), Arm::B);
        assert_eq!(assigner.assign("user-3").unwrap(), Arm::A);
        assert_eq!(
            assigner
                .assign("550e8400-e29b-41d4-a716-446655440001")
                .unwrap(),
            Arm::B
        );
    }

    #[test]
    fn test_assignment_is_deterministic() {
        let assigner = VariantAssigner::new();
        let first = assigner.assign("some-user").unwrap();
        for _ in 0..100 {
            assert_eq!(assigner.assign("some-user").unwrap(), first);
        }
        assert_eq!(VariantAssigner::default().assign("some-user").unwrap(), first);
    }

    #[test]
    fn test_empty_user_id_rejected() {
        let assigner = VariantAssigner::new();
        assert!(matches!(
            assigner.assign(""),
            Err(RetentionError::InvalidInput(_))
        ));
        assert!(assigner.assign("   ").is_err());
    }

    #[test]
    fn test_population_is_balanced() {
        let assigner = VariantAssigner::new();
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = HashSet::new();
        let mut b_count = 0usize;

        while seen.len() < 100_000 {
            let id = format!("user-{:016x}", rng.gen::<u64>());
            if !seen.insert(id.clone()) {
                continue;
            }
            if assigner.assign(&id).unwrap() == Arm::B {
                b_count += 1;
            }
        }

        let ratio = b_count as f64 / seen.len() as f64;
        assert!((ratio - 0.5).abs() < 0.02, "B ratio {ratio} out of tolerance");
    }

    #[test]
    fn test_injected_digest() {
        fn odd(_: &[u8]) -> Vec<u8> {
            vec![0, 0, 0, 1, 0xff]
        }
        fn even(_: &[u8]) -> Vec<u8> {
            vec![0xff, 0xff, 0xff, 0xfe]
        }
        fn short(_: &[u8]) -> Vec<u8> {
            vec![3]
        }

        assert_eq!(
            VariantAssigner::new().with_digest(odd).assign("x").unwrap(),
            Arm::B
        );
        assert_eq!(
            VariantAssigner::new().with_digest(even).assign("x").unwrap(),
            Arm::A
        );
        assert_eq!(
            VariantAssigner::new().with_digest(short).assign("x").unwrap(),
            Arm::B
        );
    }

    #[test]
    fn test_digest_sees_salted_input() {
        fn echo(input: &[u8]) -> Vec<u8> {
            // Last byte of the salt decides parity: '4' (0x34) is even.
            vec![0, 0, 0, *input.last().unwrap()]
        }
        let assigner = VariantAssigner::new().with_digest(echo);
        assert_eq!(assigner.salt(), VARIANT_SALT);
        assert_eq!(assigner.assign("anyone").unwrap(), Arm::A);
    }
}
