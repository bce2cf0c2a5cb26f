//! Deterministic percentage rollout.
//!
//! An identity lands in bucket `u32_be(sha256("{salt}:{feature}:{stableId}")[..4]) % 10_000`
//! and is inside a rollout of `p` percent iff `bucket < round(p * 100)`. Raising
//! the percentage only ever adds identities; changing the salt reshuffles them.

use core::fmt;

use sha2::{Digest, Sha256};

use crate::context::StableId;
use crate::feature::FeatureId;

pub const BUCKET_COUNT: u32 = 10_000;

/// Bucket used when the context carries no stable id. It is the last bucket,
/// so only a 100% rollout admits anonymous contexts.
pub const MISSING_STABLE_ID_BUCKET: u32 = BUCKET_COUNT - 1;

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("rollout {0} is outside 0..=100")]
pub struct InvalidRollout(pub f64);

/// Share of the matching population a rule admits, in percent.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Rollout(f64);

impl Rollout {
    pub const FULL: Rollout = Rollout(100.0);
    pub const NONE: Rollout = Rollout(0.0);

    pub fn new(percent: f64) -> Result<Self, InvalidRollout> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(InvalidRollout(percent));
        }
        Ok(Rollout(percent))
    }

    pub fn percent(&self) -> f64 {
        self.0
    }

    /// Rollout in basis points, 0 to 10_000.
    pub fn threshold(&self) -> u32 {
        ((self.0 * 100.0).round() as u32).min(BUCKET_COUNT)
    }

    pub fn is_full(&self) -> bool {
        self.threshold() == BUCKET_COUNT
    }
}

impl Default for Rollout {
    fn default() -> Self {
        Rollout::FULL
    }
}

impl fmt::Display for Rollout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

pub fn bucket(salt: &str, feature_key: &str, stable_id_hex: &str) -> u32 {
    let input = format!("{}:{}:{}", salt, feature_key, stable_id_hex);
    let digest = Sha256::digest(input.as_bytes());
    let value = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    value % BUCKET_COUNT
}

pub fn bucket_for(salt: &str, feature: &FeatureId, stable_id: Option<&StableId>) -> u32 {
    match stable_id {
        Some(id) => bucket(salt, feature.as_str(), id.as_hex()),
        None => MISSING_STABLE_ID_BUCKET,
    }
}

pub fn is_in_rollout(
    salt: &str,
    feature: &FeatureId,
    stable_id: Option<&StableId>,
    rollout: Rollout,
) -> bool {
    bucket_for(salt, feature, stable_id) < rollout.threshold()
}
