use thiserror::Error;

/// Failure to resolve a (possibly abbreviated) process id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("No process matches '{0}'")]
    NotFound(String),

    #[error("{count} processes match '{prefix}'")]
    Ambiguous { prefix: String, count: usize },
}

/// Generates a new process id: 32 lowercase hex digits.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Resolves `prefix` to the single id that starts with it.
pub fn search<'a, I>(ids: I, prefix: &str) -> Result<&'a str, LookupError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut matches = ids.into_iter().filter(|id| id.starts_with(prefix));
    let Some(first) = matches.next() else {
        return Err(LookupError::NotFound(prefix.to_string()));
    };
    let extra = matches.count();
    if extra > 0 {
        return Err(LookupError::Ambiguous {
            prefix: prefix.to_string(),
            count: extra + 1,
        });
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDS: [&str; 3] = ["abc123", "abd456", "f00"];

    #[test]
    fn unique_prefix_resolves() {
        assert_eq!(search(IDS, "abc"), Ok("abc123"));
        assert_eq!(search(IDS, "f00"), Ok("f00"));
    }

    #[test]
    fn shared_prefix_is_ambiguous() {
        assert_eq!(
            search(IDS, "ab"),
            Err(LookupError::Ambiguous {
                prefix: "ab".to_string(),
                count: 2
            })
        );
    }

    #[test]
    fn unknown_prefix_is_not_found() {
        assert_eq!(search(IDS, "z"), Err(LookupError::NotFound("z".to_string())));
    }

    #[test]
    fn generated_ids_are_hex() {
        let id = new_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_id());
    }
}
