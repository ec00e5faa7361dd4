//! Generation of database names, users, and passwords.
//!
//! Names and users follow the remote's `{account}_{suffix}` convention and
//! its 32-character identifier limit; passwords come from the operating
//! system's entropy source.

use rand::RngCore;
use rand::rngs::OsRng;

/// Remote identifier length limit for database and user names.
const IDENTIFIER_LIMIT: usize = 32;

/// Bytes of entropy in a generated password (hex-encoded on output).
const PASSWORD_BYTES: usize = 16;

/// Derives missing database credentials for an account scope.
#[derive(Clone, Copy, Debug, Default)]
pub struct CredentialGenerator;

impl CredentialGenerator {
    /// Returns `hint` when supplied, otherwise derives a database name from
    /// the account scope.
    #[must_use]
    pub fn database_name(self, scope: &str, hint: Option<&str>) -> String {
        resolve_identifier(scope, hint, "app")
    }

    /// Returns `hint` when supplied, otherwise derives a database user from
    /// the account scope.
    #[must_use]
    pub fn database_user(self, scope: &str, hint: Option<&str>) -> String {
        resolve_identifier(scope, hint, "appuser")
    }

    /// Returns `hint` when supplied, otherwise generates a fresh random
    /// password: [`PASSWORD_BYTES`] bytes from `OsRng`, hex-encoded.
    #[must_use]
    pub fn password(self, hint: Option<&str>) -> String {
        if let Some(hint) = hint.filter(|value| !value.is_empty()) {
            return hint.to_owned();
        }
        let mut bytes = [0_u8; PASSWORD_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

fn resolve_identifier(scope: &str, hint: Option<&str>, suffix: &str) -> String {
    if let Some(hint) = hint.filter(|value| !value.is_empty()) {
        return truncate(hint);
    }
    let derived = format!("{}_{suffix}", scope.to_ascii_lowercase());
    truncate(&derived)
}

fn truncate(identifier: &str) -> String {
    identifier.chars().take(IDENTIFIER_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::name(None, "acme_app")]
    #[case::explicit(Some("custom_db"), "custom_db")]
    fn database_name_prefers_hint(#[case] hint: Option<&str>, #[case] expected: &str) {
        assert_eq!(CredentialGenerator.database_name("acme", hint), expected);
    }

    #[test]
    fn database_user_derives_from_scope() {
        assert_eq!(CredentialGenerator.database_user("Acme", None), "acme_appuser");
    }

    #[test]
    fn derived_identifiers_respect_remote_limit() {
        let scope = "a".repeat(40);
        let name = CredentialGenerator.database_name(&scope, None);
        assert_eq!(name.len(), IDENTIFIER_LIMIT);
    }

    #[test]
    fn generated_password_is_32_hex_chars() {
        let password = CredentialGenerator.password(None);
        assert_eq!(password.len(), PASSWORD_BYTES * 2);
        assert!(password.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_passwords_differ() {
        let first = CredentialGenerator.password(None);
        let second = CredentialGenerator.password(None);
        assert_ne!(first, second);
    }

    #[test]
    fn empty_hint_counts_as_missing() {
        let password = CredentialGenerator.password(Some(""));
        assert_eq!(password.len(), PASSWORD_BYTES * 2);
    }
}
