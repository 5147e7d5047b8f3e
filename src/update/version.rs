use semver::Version;

/// Decide whether `remote` should be installed over `local`.
///
/// Any tag that differs from the local version triggers an update, including
/// an older one. Ordering is only used to warn about downgrades.
pub fn needs_update(local: &str, remote: &str) -> bool {
    if local == remote {
        return false;
    }

    if is_downgrade(local, remote) {
        tracing::warn!(local, remote, "remote release is older than the local version");
    }
    true
}

/// Parse a version string (with or without 'v' prefix)
pub fn parse_version(version_str: &str) -> Option<Version> {
    let cleaned = version_str.trim_start_matches('v');
    Version::parse(cleaned).ok()
}

/// True when both strings are semver and `remote` sorts before `local`
pub fn is_downgrade(local: &str, remote: &str) -> bool {
    match (parse_version(local), parse_version(remote)) {
        (Some(local), Some(remote)) => remote < local,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_versions_need_no_update() {
        assert!(!needs_update("1.0", "1.0"));
        assert!(!needs_update("v2.3.1", "v2.3.1"));
    }

    #[test]
    fn test_any_difference_needs_update() {
        assert!(needs_update("1.0", "2.0"));
        assert!(needs_update("2.0", "1.0"));
        assert!(needs_update("1.0.0", "v1.0.0"));
        assert!(needs_update("beta", "gamma"));
    }

    #[test]
    fn test_is_downgrade() {
        assert!(is_downgrade("2.0.0", "v1.9.9"));
        assert!(!is_downgrade("1.0.0", "1.0.1"));
        assert!(!is_downgrade("1.0", "0.9"));
        assert!(parse_version("v1.0.0").is_some());
        assert!(parse_version("invalid").is_none());
    }
}
