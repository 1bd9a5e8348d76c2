//! Structural identifiers.
//!
//! A SID is derived from the parent SID, the node's source segment (explicit
//! marker, or `TAG#INDEX` within the enclosing root or component template),
//! and the iteration key when the node is an immediate child of an iteration
//! expansion. Keying off the *source* position is what keeps a sibling's SID
//! stable when a conditional branch flips or an iteration changes row count.

use sha2::{Digest, Sha256};

/// Derive a child SID. Deterministic; the same inputs always produce the
/// same identifier across renders.
pub fn child_sid(parent: &str, segment: &str, iteration_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent.as_bytes());
    hasher.update([0u8]);
    hasher.update(segment.as_bytes());
    hasher.update([0u8]);
    hasher.update(iteration_key.as_bytes());
    let digest = hasher.finalize();
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

/// The namespace id backing local state for a SID.
pub fn local_ns(sid: &str) -> String {
    format!("local:{}", sid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = child_sid("root", "div#0", "");
        let b = child_sid("root", "div#0", "");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_inputs_distinguish() {
        let base = child_sid("root", "div#0", "");
        assert_ne!(base, child_sid("root", "div#1", ""));
        assert_ne!(base, child_sid("other", "div#0", ""));
        assert_ne!(base, child_sid("root", "div#0", "k"));
    }
}
