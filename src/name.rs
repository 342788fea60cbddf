use crate::error::{Error, Result};

/// Longest permitted server name. Conservative enough to keep socket paths well under
/// `sockaddr_un` limits for any sane socket directory.
pub(crate) const MAX_NAME_LEN: usize = 100;

/// Validates a server name before any filesystem or pipe-namespace interaction.
///
/// Names are restricted to ASCII alphanumerics plus `-`, `_` and `.`, must be non-empty, must
/// not start with a dot and must not exceed [`MAX_NAME_LEN`] bytes.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.len() > MAX_NAME_LEN
        || name.starts_with('.')
        || !name.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
    {
        return Err(Error::InvalidName(name.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_reasonable_names() {
        for name in ["a", "vm-gc-stats", "agent_proxy", "cmd.channel", "A9"] {
            assert!(validate_name(name).is_ok(), "{name:?} should be valid");
        }
    }

    #[test]
    fn rejects_bad_names() {
        let too_long = "x".repeat(MAX_NAME_LEN + 1);
        for name in ["", ".hidden", "has space", "slash/y", "nul\0", "../escape", &too_long] {
            assert!(
                matches!(validate_name(name), Err(Error::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
    }
}
