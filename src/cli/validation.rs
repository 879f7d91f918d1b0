//! CLI argument validation functions
//!
//! Custom value parsers for arguments clap cannot validate on its own.

use std::fs;
use std::path::PathBuf;

/// Validate that a file path is accessible (exists and is readable)
pub fn validate_config_file_path(path_str: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(format!("Configuration file does not exist: '{}'", path_str));
    }

    if !path.is_file() {
        return Err(format!("Configuration path is not a file: '{}'", path_str));
    }

    match fs::File::open(&path) {
        Ok(_) => Ok(path),
        Err(e) => Err(format!("Cannot read configuration file '{}': {}", path_str, e)),
    }
}

/// Validate rollback steps is a positive number
pub fn validate_rollback_steps(steps_str: &str) -> Result<u32, String> {
    let steps: u32 = steps_str.parse().map_err(|_| {
        format!(
            "Rollback steps must be a valid positive number, got: '{}'",
            steps_str
        )
    })?;

    if steps == 0 {
        return Err("Rollback steps must be greater than 0".to_string());
    }

    if steps > 100 {
        return Err("Rollback steps cannot exceed 100".to_string());
    }

    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_config_file_path_valid() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[worker]").unwrap();

        let path = file.path().to_str().unwrap();
        assert_eq!(validate_config_file_path(path).unwrap(), file.path());
    }

    #[test]
    fn test_config_file_path_missing() {
        let err = validate_config_file_path("/nonexistent/cronfleet.toml").unwrap_err();
        assert!(err.contains("does not exist"));
    }

    #[test]
    fn test_config_file_path_directory() {
        let dir = TempDir::new().unwrap();
        let err = validate_config_file_path(dir.path().to_str().unwrap()).unwrap_err();
        assert!(err.contains("not a file"));
    }

    #[test]
    fn test_rollback_steps_validation_valid() {
        for steps_str in ["1", "5", "100"] {
            assert!(
                validate_rollback_steps(steps_str).is_ok(),
                "Steps {} should be valid",
                steps_str
            );
        }
    }

    #[test]
    fn test_rollback_steps_validation_invalid() {
        for steps_str in ["0", "101", "-1", "abc", ""] {
            assert!(
                validate_rollback_steps(steps_str).is_err(),
                "Steps '{}' should be invalid",
                steps_str
            );
        }
    }
}
