//! Deterministic identifiers for derived records.
//!
//! Each derivation hashes a domain-separation tag followed by its inputs,
//! each prefixed with its byte length, so distinct input tuples can never
//! encode to the same preimage (`("ab", "c")` and `("a", "bc")` differ).

use sha2::{Digest, Sha256};

const COLLAB_DOMAIN: &[u8] = b"confer-collab-v1";
const CONVERSATION_DOMAIN: &[u8] = b"confer-conversation-v1";

/// Hex characters kept from the digest (128 bits).
const ID_HEX_LEN: usize = 32;

fn digest_parts(domain: &[u8], parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..ID_HEX_LEN / 2])
}

/// Identifier of the collaboration edge joining `collaborator_id` to `resource_id`.
///
/// Inputs are positional: the resource always comes first. The same pair
/// always yields the same id, which makes creation of the edge an
/// idempotent upsert and lets the id double as the collaboration's chat
/// identity.
pub fn derive_collaboration_id(resource_id: &str, collaborator_id: &str) -> String {
    format!(
        "collab-{}",
        digest_parts(COLLAB_DOMAIN, &[resource_id, collaborator_id])
    )
}

/// Identifier of the direct conversation between two users.
///
/// Order-independent: the inputs are sorted before hashing, so
/// `derive_conversation_id(a, b) == derive_conversation_id(b, a)`.
pub fn derive_conversation_id(a: &str, b: &str) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("conv-{}", digest_parts(CONVERSATION_DOMAIN, &[low, high]))
}
