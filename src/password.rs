use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Salted SHA-256, stored as `sha256$<salt>$<hex digest>`.
pub fn hash_password(plain: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    let digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(plain.as_bytes())
        .finalize();
    format!("sha256${}${:x}", salt, digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("changeme");
        let b = hash_password("changeme");
        assert_ne!(a, b);

        let parts: Vec<&str> = a.split('$').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "sha256");
        assert_eq!(parts[2].len(), 64);
        assert!(!a.contains("changeme"));
    }
}
