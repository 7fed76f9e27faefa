//! Finding identity fingerprints and source links.
//!
//! The identity of a finding is `(file_path, file_hash, vulnerability_type,
//! line_number)`; repository and branch are deliberately excluded so the same
//! vulnerable shared file hashes identically wherever it was found.

use sha2::{Digest, Sha256};

use crate::models::vulnerability::FindingIdentity;

/// Compute the identity fingerprint of a finding.
pub fn compute(identity: &FindingIdentity) -> String {
    let line = identity
        .line_number
        .map(|l| l.to_string())
        .unwrap_or_default();
    hash(&format!(
        "{}\0{}\0{}\0{}",
        identity.file_path, identity.file_hash, identity.vulnerability_type, line
    ))
}

/// Browser link to the finding: `{repo_url}/blob/{branch}/{file_path}#L{line}`.
pub fn source_url(repo_url: &str, branch: Option<&str>, file_path: &str, line: Option<i32>) -> String {
    let branch = branch.unwrap_or(crate::services::ingestion::DEFAULT_BRANCH);
    let path = file_path.trim_start_matches('/');
    let base = format!("{}/blob/{branch}/{path}", repo_url.trim_end_matches('/'));
    match line {
        Some(line) => format!("{base}#L{line}"),
        None => base,
    }
}

/// SHA-256 hash a string and return hex-encoded digest.
fn hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(path: &str, hash: &str, kind: &str, line: Option<i32>) -> FindingIdentity {
        FindingIdentity {
            file_path: path.to_string(),
            file_hash: hash.to_string(),
            vulnerability_type: kind.to_string(),
            line_number: line,
        }
    }

    #[test]
    fn same_identity_same_fingerprint() {
        let a = compute(&identity("a.yml", "h1", "shellcheck", Some(3)));
        let b = compute(&identity("a.yml", "h1", "shellcheck", Some(3)));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn each_component_matters() {
        let base = compute(&identity("a.yml", "h1", "shellcheck", Some(3)));
        assert_ne!(base, compute(&identity("b.yml", "h1", "shellcheck", Some(3))));
        assert_ne!(base, compute(&identity("a.yml", "h2", "shellcheck", Some(3))));
        assert_ne!(base, compute(&identity("a.yml", "h1", "credentials", Some(3))));
        assert_ne!(base, compute(&identity("a.yml", "h1", "shellcheck", Some(4))));
        assert_ne!(base, compute(&identity("a.yml", "h1", "shellcheck", None)));
    }

    #[test]
    fn separator_prevents_field_bleed() {
        let a = compute(&identity("ab", "c", "k", None));
        let b = compute(&identity("a", "bc", "k", None));
        assert_ne!(a, b);
    }

    #[test]
    fn source_url_with_line() {
        assert_eq!(
            source_url(
                "https://github.com/acme/widgets",
                Some("develop"),
                ".github/workflows/ci.yml",
                Some(14)
            ),
            "https://github.com/acme/widgets/blob/develop/.github/workflows/ci.yml#L14"
        );
    }

    #[test]
    fn source_url_defaults_branch() {
        assert_eq!(
            source_url("https://github.com/acme/widgets/", None, "/a.yml", None),
            "https://github.com/acme/widgets/blob/main/a.yml"
        );
    }
}
