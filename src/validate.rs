use regex::Regex;

use std::sync::OnceLock;

use crate::config::SyncConfig;

/// Reasons a [SyncConfig] is not runnable. Messages name the offending setting
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("remote host is not a valid IPv4 address; set one with `vaultsync config set remote-host <addr>`")]
    InvalidAddress,
    #[error("source path is empty; set the path to the vault with `vaultsync config set source-path <path>`")]
    MissingPath,
    #[error("username is empty; set the backup server username with `vaultsync config set username <name>`")]
    MissingUsername,
}

// shape only: octets are not range-checked, so `999.999.999.999` passes
fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();

    PATTERN.get_or_init(|| Regex::new(r"^([0-9]{1,3}\.){3}[0-9]{1,3}$").expect("static pattern"))
}

/// Whether `addr` has the shape of a dotted-quad IPv4 address
pub fn is_address(addr: &str) -> bool {
    address_pattern().is_match(addr)
}

/// Check a [SyncConfig] before anything is spawned.
///
/// Checks run in order (address, source path, username) and stop at the first failure
pub fn validate(config: &SyncConfig) -> Result<(), ValidationError> {
    if !is_address(&config.remote_host) {
        return Err(ValidationError::InvalidAddress);
    }

    if config.source_path.is_empty() {
        return Err(ValidationError::MissingPath);
    }

    if config.username.is_empty() {
        return Err(ValidationError::MissingUsername);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(remote_host: &str, source_path: &str, username: &str) -> SyncConfig {
        SyncConfig {
            remote_host: remote_host.into(),
            username: username.into(),
            source_path: source_path.into(),
        }
    }

    #[test]
    fn accepts_well_formed_config() {
        assert_eq!(validate(&config("192.168.0.201", "/mnt/c/vault", "alice")), Ok(()));
        assert_eq!(validate(&config("0.0.0.0", "x", "y")), Ok(()));
    }

    #[test]
    fn rejects_malformed_addresses() {
        let bad = [
            "",
            "localhost",
            "192.168.0",
            "192.168.0.201.5",
            "1234.1.1.1",
            "192.168.0.",
            " 192.168.0.201",
            "192.168.0.201 ",
            "192.168.0.201\n",
            "a.b.c.d",
            "192,168,0,201",
            "::1",
            // non-ASCII digits
            "١٩٢.١.١.١",
        ];

        for addr in bad {
            assert_eq!(
                validate(&config(addr, "/vault", "alice")),
                Err(ValidationError::InvalidAddress),
                "{addr:?} should be rejected"
            );
        }
    }

    #[test]
    fn octets_are_not_range_checked() {
        assert_eq!(validate(&config("999.999.999.999", "x", "y")), Ok(()));
        assert_eq!(validate(&config("256.0.0.1", "x", "y")), Ok(()));
    }

    #[test]
    fn checks_short_circuit_in_order() {
        assert_eq!(validate(&config("nope", "", "")), Err(ValidationError::InvalidAddress));
        assert_eq!(validate(&config("10.0.0.1", "", "")), Err(ValidationError::MissingPath));
        assert_eq!(validate(&config("10.0.0.1", "/vault", "")), Err(ValidationError::MissingUsername));
    }

    #[test]
    fn messages_name_the_field() {
        assert!(ValidationError::InvalidAddress.to_string().contains("remote host"));
        assert!(ValidationError::MissingPath.to_string().contains("source path"));
        assert!(ValidationError::MissingUsername.to_string().contains("username"));
    }
}
