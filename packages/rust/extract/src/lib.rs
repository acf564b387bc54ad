//! Content handling for landed decision files.
//!
//! - [`classify`] maps a file extension to a [`Handling`] policy
//! - [`RegionSelector`] pulls the decision body out of an HTML page
//! - [`sha256_hex`] fingerprints canonical bytes

mod classify;
mod region;

use sha2::{Digest, Sha256};

pub use classify::{Handling, POLICY, PolicyRow, classify, content_type, normalize_ext};
pub use region::{RegionSelector, extract_region};

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn sha256_of_known_input() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sha256_is_lowercase_hex() {
        let hex = sha256_hex(b"<div class=\"content\">x</div>");
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
