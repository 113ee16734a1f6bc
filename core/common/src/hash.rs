//! Git object hashing.

use sha1::{Digest, Sha1};

/// Compute the Git blob object id for `content`.
///
/// This is the SHA-1 of `"blob <len>\0"` followed by the raw bytes, the same
/// value `git hash-object` prints and the remote reports for tree entries.
pub fn git_blob_sha(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_blob() {
        assert_eq!(git_blob_sha(b""), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn test_known_blob() {
        assert_eq!(
            git_blob_sha(b"hello world\n"),
            "3b18e512dba79e4c8300dd08aeb37f8e728b8dad"
        );
    }

    #[test]
    fn test_binary_content_differs() {
        let a = git_blob_sha(&[0u8, 159, 146, 150]);
        let b = git_blob_sha(&[0u8, 159, 146, 151]);
        assert_ne!(a, b);
        assert_eq!(a.len(), 40);
    }
}
