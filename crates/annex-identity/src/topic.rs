//! Topic grammar validation.
//!
//! Topics scope pseudonyms and follow `annex:<scope>[:<slug>]:v1` with
//! scope one of `server`, `channel`, `federation`. The slug segment is
//! optional (the federation scope omits it).

use crate::IdentityError;

const VALID_SCOPES: [&str; 3] = ["server", "channel", "federation"];

/// Validates a topic string against the grammar.
///
/// # Errors
///
/// Returns [`IdentityError::InvalidInput`] for any deviation: wrong
/// prefix, unknown scope, empty or malformed slug, or missing version.
pub fn validate_topic(topic: &str) -> Result<(), IdentityError> {
    let parts: Vec<&str> = topic.split(':').collect();

    let ok = match parts.as_slice() {
        ["annex", scope, "v1"] => VALID_SCOPES.contains(scope),
        ["annex", scope, slug, "v1"] => {
            VALID_SCOPES.contains(scope)
                && !slug.is_empty()
                && slug
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        }
        _ => false,
    };

    if ok {
        Ok(())
    } else {
        Err(IdentityError::InvalidInput(format!(
            "topic '{topic}' does not match annex:<scope>[:<slug>]:v1"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_topics() {
        validate_topic("annex:server:default:v1").unwrap();
        validate_topic("annex:channel:general:v1").unwrap();
        validate_topic("annex:channel:dev_ops-1:v1").unwrap();
        validate_topic("annex:federation:v1").unwrap();
    }

    #[test]
    fn rejects_malformed_topics() {
        for bad in [
            "",
            "annex",
            "annex:server",
            "annex:server:default",
            "annex:server:default:v2",
            "annex:voice:default:v1",
            "annex:server::v1",
            "annex:server:General:v1",
            "matrix:server:default:v1",
            "annex:server:a:b:v1",
        ] {
            assert!(validate_topic(bad).is_err(), "'{bad}' should be rejected");
        }
    }
}
