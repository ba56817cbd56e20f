//! SHA-256-derived hex ID generation.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Creates a hash-based ID for an issue: `<prefix>-<hex suffix>`.
///
/// The suffix is a prefix of the SHA-256 digest of the issue's content
/// (title, description, creator, timestamp, nonce), rendered as lowercase
/// hex. The nonce lets callers retry on an (unlikely) collision without
/// changing any other input.
pub fn generate_hash_id(
    prefix: &str,
    title: &str,
    description: &str,
    creator: &str,
    timestamp: DateTime<Utc>,
    length: usize,
    nonce: i32,
) -> String {
    let content = format!(
        "{}|{}|{}|{}|{}",
        title,
        description,
        creator,
        timestamp.timestamp_nanos_opt().unwrap_or(0),
        nonce
    );

    let hash = Sha256::digest(content.as_bytes());
    let hex = format!("{:x}", hash);
    let suffix = &hex[..length.min(hex.len())];
    format!("{}-{}", prefix, suffix)
}

/// Computes the collision probability using the birthday paradox approximation.
///
/// P(collision) ~ 1 - e^(-n^2 / 2N) where n = number of items, N = total
/// possible values for the given hex length.
fn collision_probability(num_issues: usize, id_length: usize) -> f64 {
    let total: f64 = 16.0_f64.powi(id_length as i32);
    let exponent = -(num_issues as f64).powi(2) / (2.0 * total);
    1.0 - exponent.exp()
}

/// Determines the optimal ID length for the current database size.
///
/// Tries lengths from `min_length` to `max_length`, returning the first that
/// keeps the collision probability at or below `max_collision_prob`.
pub fn compute_adaptive_length(
    num_issues: usize,
    min_length: usize,
    max_length: usize,
    max_collision_prob: f64,
) -> usize {
    for length in min_length..=max_length {
        let prob = collision_probability(num_issues, length);
        if prob <= max_collision_prob {
            return length;
        }
    }
    max_length
}

/// Default adaptive ID configuration constants.
pub mod adaptive_defaults {
    /// Default collision probability threshold (25%).
    pub const MAX_COLLISION_PROB: f64 = 0.25;
    /// Default minimum hex length.
    pub const MIN_LENGTH: usize = 6;
    /// Default maximum hex length.
    pub const MAX_LENGTH: usize = 16;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_hash_id_format() {
        let ts = Utc::now();
        let id = generate_hash_id("proj", "Test Title", "desc", "alice", ts, 8, 0);
        assert!(id.starts_with("proj-"));
        assert_eq!(id.len(), "proj-".len() + 8);
        assert!(id.chars().skip(5).all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_hash_id_deterministic() {
        let ts = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let id1 = generate_hash_id("proj", "Title", "Desc", "alice", ts, 8, 0);
        let id2 = generate_hash_id("proj", "Title", "Desc", "alice", ts, 8, 0);
        assert_eq!(id1, id2);
    }

    #[test]
    fn generate_hash_id_nonce_changes_output() {
        let ts = Utc::now();
        let id1 = generate_hash_id("proj", "Title", "Desc", "alice", ts, 8, 0);
        let id2 = generate_hash_id("proj", "Title", "Desc", "alice", ts, 8, 1);
        assert_ne!(id1, id2);
    }

    #[test]
    fn adaptive_length_small_repo() {
        let len = compute_adaptive_length(10, 6, 16, 0.25);
        assert_eq!(len, 6);
    }

    #[test]
    fn adaptive_length_large_repo_grows() {
        let len = compute_adaptive_length(1_000_000, 6, 16, 0.25);
        assert!(len > 6);
    }

    #[test]
    fn adaptive_length_capped_at_max() {
        let len = compute_adaptive_length(10_000_000_000, 6, 16, 0.01);
        assert_eq!(len, 16);
    }
}
