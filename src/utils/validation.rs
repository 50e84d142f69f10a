use crate::utils::error::{ReconcileError, Result};
use std::collections::HashSet;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(ReconcileError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(ReconcileError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_port(field_name: &str, port: u16) -> Result<()> {
    if port == 0 {
        return Err(ReconcileError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: port.to_string(),
            reason: "Port must be between 1 and 65535".to_string(),
        });
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ReconcileError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

/// Relation names end up in hook names, so they follow the hook naming rules.
pub fn validate_relation_name(field_name: &str, name: &str) -> Result<()> {
    validate_non_empty_string(field_name, name)?;

    let valid = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid || name.starts_with('-') {
        return Err(ReconcileError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: name.to_string(),
            reason: "Relation names may only contain lowercase letters, digits and '-'"
                .to_string(),
        });
    }
    Ok(())
}

pub fn validate_unique<T>(field_name: &str, values: &[T]) -> Result<()>
where
    T: std::hash::Hash + Eq + std::fmt::Display,
{
    let mut seen = HashSet::new();
    for value in values {
        if !seen.insert(value) {
            return Err(ReconcileError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: value.to_string(),
                reason: "Duplicate value".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_port() {
        assert!(validate_port("ports.host", 8080).is_ok());
        assert!(validate_port("ports.host", 0).is_err());
    }

    #[test]
    fn test_validate_relation_name() {
        assert!(validate_relation_name("peers.relation", "intracluster").is_ok());
        assert!(validate_relation_name("peers.relation", "db-admin").is_ok());
        assert!(validate_relation_name("peers.relation", "").is_err());
        assert!(validate_relation_name("peers.relation", "Web Site").is_err());
        assert!(validate_relation_name("peers.relation", "-web").is_err());
    }

    #[test]
    fn test_validate_unique() {
        assert!(validate_unique("ports.host", &[80u16, 28015, 29015]).is_ok());
        assert!(validate_unique("ports.host", &[80u16, 80]).is_err());
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("volumes.host_path", "data").is_ok());
        assert!(validate_path("volumes.host_path", "").is_err());
        assert!(validate_path("volumes.host_path", "bad\0path").is_err());
    }
}
