//! Utility functions for minifs

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Ideal per-node file counts `(floor(R*F/N), ceil(R*F/N))`.
///
/// Returns `(0, 0)` for an empty cluster.
pub fn ideal_bounds(replicas: usize, files: usize, nodes: usize) -> (usize, usize) {
    if nodes == 0 {
        return (0, 0);
    }
    let total = replicas * files;
    (total / nodes, total.div_ceil(nodes))
}

/// Validate a filename as a single protocol token
pub fn validate_filename(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::MalformedCommand(
            "filename cannot be empty".into(),
        ));
    }

    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(crate::Error::MalformedCommand(format!(
            "filename contains invalid characters: {:?}",
            name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_ideal_bounds() {
        assert_eq!(ideal_bounds(3, 4, 4), (3, 3));
        assert_eq!(ideal_bounds(3, 5, 4), (3, 4));
        assert_eq!(ideal_bounds(2, 1, 3), (0, 1));
        assert_eq!(ideal_bounds(3, 10, 0), (0, 0));
    }

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("a.txt").is_ok());
        assert!(validate_filename("dir/a.txt").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("a b").is_err());
        assert!(validate_filename("a\tb").is_err());
    }
}
