//! Topic name validation and segmentation.
//!
//! Topic names are dot-separated segments (`room.42`, `presence.user.7`).
//! Concrete names never contain pattern placeholders; those belong to route
//! patterns on the server side.

use crate::error::ProtocolError;

/// Separator between topic segments.
pub const SEPARATOR: char = '.';

/// Iterate over the segments of a topic name.
pub fn segments(name: &str) -> impl Iterator<Item = &str> {
    name.split(SEPARATOR)
}

/// Validate a concrete topic name against size limits.
///
/// Segments must be non-empty and drawn from `[A-Za-z0-9_-]`.
pub fn validate(name: &str, max_length: usize, max_segments: usize) -> Result<(), ProtocolError> {
    if name.is_empty() {
        return Err(ProtocolError::InvalidTopic("empty topic name".into()));
    }
    if name.len() > max_length {
        return Err(ProtocolError::InvalidTopic(format!(
            "topic name exceeds {} bytes",
            max_length
        )));
    }

    let mut count = 0;
    for segment in segments(name) {
        count += 1;
        if segment.is_empty() {
            return Err(ProtocolError::InvalidTopic(format!(
                "empty segment in '{}'",
                name
            )));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ProtocolError::InvalidTopic(format!(
                "invalid characters in segment '{}'",
                segment
            )));
        }
    }

    if count > max_segments {
        return Err(ProtocolError::InvalidTopic(format!(
            "topic has {} segments, maximum is {}",
            count, max_segments
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(validate("room.lobby", 256, 16).is_ok());
        assert!(validate("chat.1", 256, 16).is_ok());
        assert!(validate("a", 256, 16).is_ok());
        assert!(validate("metrics.node-3.cpu_load", 256, 16).is_ok());
    }

    #[test]
    fn test_empty_name() {
        assert!(validate("", 256, 16).is_err());
    }

    #[test]
    fn test_empty_segments() {
        assert!(validate(".room", 256, 16).is_err());
        assert!(validate("room.", 256, 16).is_err());
        assert!(validate("room..lobby", 256, 16).is_err());
    }

    #[test]
    fn test_invalid_characters() {
        assert!(validate("room/lobby", 256, 16).is_err());
        assert!(validate("room.{id}", 256, 16).is_err());
        assert!(validate("room.lob by", 256, 16).is_err());
    }

    #[test]
    fn test_length_limits() {
        assert!(validate("abcdef", 5, 16).is_err());
        assert!(validate("a.b.c", 256, 2).is_err());
        assert!(validate("a.b", 256, 2).is_ok());
    }

    #[test]
    fn test_segments_iterator() {
        let segs: Vec<&str> = segments("room.42.users").collect();
        assert_eq!(segs, vec!["room", "42", "users"]);
    }
}
