use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of session, flow, and capture identifiers.
pub const DEFAULT_LENGTH: usize = 12;

/// Generates a random alphanumeric token of the given length.
///
/// Callers that need global uniqueness (session and flow registries)
/// re-generate on the rare collision.
pub fn generate(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_length() {
        assert_eq!(generate(DEFAULT_LENGTH).len(), DEFAULT_LENGTH);
        assert_eq!(generate(4).len(), 4);
    }

    #[test]
    fn test_generate_alphanumeric() {
        let id = generate(64);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
