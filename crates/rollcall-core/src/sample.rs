//! Enrollment sample file naming: `{id}.{name}.{index}.jpg`.

use std::fmt;
use thiserror::Error;

pub const SAMPLE_EXTENSION: &str = "jpg";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SampleError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} {value:?} contains a forbidden character ('.', '/', '\\' or a control character)")]
    ForbiddenChar { field: &'static str, value: String },
}

/// A person being enrolled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub name: String,
}

impl Identity {
    /// Validate and build an identity. Both parts end up in file names, so
    /// separators are rejected.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Result<Self, SampleError> {
        let id = id.into().trim().to_string();
        let name = name.into().trim().to_string();
        check_token("id", &id)?;
        check_token("name", &name)?;
        Ok(Self { id, name })
    }

    pub fn sample(&self, index: u32) -> SampleName {
        SampleName {
            id: self.id.clone(),
            name: self.name.clone(),
            index: Some(index),
        }
    }
}

fn check_token(field: &'static str, value: &str) -> Result<(), SampleError> {
    if value.is_empty() {
        return Err(SampleError::Empty { field });
    }
    if value.chars().any(|c| c == '.' || c == '/' || c == '\\' || c.is_control()) {
        return Err(SampleError::ForbiddenChar {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Parsed components of a sample file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleName {
    pub id: String,
    pub name: String,
    /// Absent for hand-placed files named `{id}.{name}.jpg`.
    pub index: Option<u32>,
}

impl SampleName {
    /// Parse a file name. Returns `None` for non-`.jpg` files or names
    /// without at least an id and a name component.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".jpg")?;
        let mut parts = stem.split('.');
        let id = parts.next().filter(|s| !s.is_empty())?;
        let name = parts.next().filter(|s| !s.is_empty())?;
        let index = parts.next().and_then(|s| s.parse().ok());

        Some(Self {
            id: id.to_string(),
            name: name.to_string(),
            index,
        })
    }

    pub fn file_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SampleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}.{}.{}.{}", self.id, self.name, index, SAMPLE_EXTENSION),
            None => write!(f, "{}.{}.{}", self.id, self.name, SAMPLE_EXTENSION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_file_name() {
        let who = Identity::new("1", "Manya").unwrap();
        assert_eq!(who.sample(7).file_name(), "1.Manya.7.jpg");
    }

    #[test]
    fn test_parse_full_name() {
        let s = SampleName::parse("12.Alice.30.jpg").unwrap();
        assert_eq!(s.id, "12");
        assert_eq!(s.name, "Alice");
        assert_eq!(s.index, Some(30));
    }

    #[test]
    fn test_parse_without_index() {
        let s = SampleName::parse("3.Bob.jpg").unwrap();
        assert_eq!(s.name, "Bob");
        assert_eq!(s.index, None);
    }

    #[test]
    fn test_parse_rejects_other_files() {
        assert!(SampleName::parse("1.Alice.1.png").is_none());
        assert!(SampleName::parse("notes.txt").is_none());
        assert!(SampleName::parse("single.jpg").is_none());
        assert!(SampleName::parse("1..2.jpg").is_none());
    }

    #[test]
    fn test_identity_trims() {
        let who = Identity::new(" 4 ", " Dan ").unwrap();
        assert_eq!(who, Identity { id: "4".into(), name: "Dan".into() });
    }

    #[test]
    fn test_identity_rejects_separators() {
        assert_eq!(Identity::new("", "x").unwrap_err(), SampleError::Empty { field: "id" });
        assert!(matches!(
            Identity::new("1", "A.B").unwrap_err(),
            SampleError::ForbiddenChar { field: "name", .. }
        ));
        assert!(Identity::new("1", "../etc").is_err());
    }
}
