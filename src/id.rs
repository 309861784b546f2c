//! Entity and correlation id generation.

use nanoid::nanoid;

/// Canonical alphabet for entity identifiers (no ambiguous glyphs: no `0/O`,
/// `1/l/I`, etc).
const ENTITY_ID_ALPHABET: &[char] = &[
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y',
    'Z', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'j', 'm', 'n', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];
const ENTITY_ID_LENGTH: usize = 20;

/// Length used for bus/transport correlation ids, ample for collision
/// avoidance within one process's in-flight request set.
const CORRELATION_ID_LENGTH: usize = 16;

/// Generates a new entity identifier.
pub fn generate_entity_id() -> String {
    nanoid!(ENTITY_ID_LENGTH, ENTITY_ID_ALPHABET)
}

/// Generates a new process-unique correlation id for bus envelopes and
/// transport control frames.
pub fn generate_correlation_id() -> String {
    nanoid!(CORRELATION_ID_LENGTH, ENTITY_ID_ALPHABET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_has_expected_length_and_charset() {
        let id = generate_entity_id();
        assert_eq!(id.len(), ENTITY_ID_LENGTH);
        assert!(id.chars().all(|c| ENTITY_ID_ALPHABET.contains(&c)));
    }

    #[test]
    fn correlation_id_has_expected_length() {
        let id = generate_correlation_id();
        assert_eq!(id.len(), CORRELATION_ID_LENGTH);
    }

    #[test]
    fn ids_are_unique() {
        let a = generate_entity_id();
        let b = generate_entity_id();
        assert_ne!(a, b);
    }
}
