use sha2::{Digest, Sha256};

use crate::harvest::traits::IdentifierGenerator;

/// Bytes of the digest kept in the identifier.
const ID_DIGEST_BYTES: usize = 16;

/// Identifier generator hashing `namespace|name` with SHA-256.
///
/// Produces `prefix` followed by 32 lowercase hex characters, which keeps
/// identifiers within authoring-language length limits.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashIdentifierGenerator;

impl IdentifierGenerator for HashIdentifierGenerator {
    fn generate(&self, prefix: &str, namespace: &str, name: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        hasher.update(b"|");
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();

        format!("{}{}", prefix, hex::encode(&digest[..ID_DIGEST_BYTES]))
    }
}
