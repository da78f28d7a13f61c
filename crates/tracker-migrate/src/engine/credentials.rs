//! Authentication material for account rows created by a migration.
//!
//! Migrated accounts never logged in to the destination, so they receive a
//! random password (only its digest is stored) and a unique login token.

use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::{CredentialPolicy, DestinationStore, Predicate, Record};
use crate::error::{MigrateError, Result};

const TOKEN_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Give up on drawing a unique token after this many collisions.
const MAX_TOKEN_ATTEMPTS: usize = 32;

/// Generated secrets for one account row.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub password_digest: String,
    pub token: String,
}

impl Credentials {
    /// Write the secrets into the columns named by `policy`.
    pub fn apply(&self, policy: &CredentialPolicy, record: &mut Record) {
        record.set(policy.password_column.clone(), self.password_digest.clone());
        record.set(policy.token_column.clone(), self.token.clone());
    }
}

/// Random printable-ASCII password of `len` characters.
pub fn random_password(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(b'!'..=b'~') as char).collect()
}

/// Random `[a-z0-9]` token of `len` characters.
pub fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| TOKEN_CHARSET[rng.gen_range(0..TOKEN_CHARSET.len())] as char)
        .collect()
}

/// Hex SHA-256 digest truncated to `width` characters.
pub fn password_digest(password: &str, width: usize) -> String {
    let mut digest = hex::encode(Sha256::digest(password.as_bytes()));
    digest.truncate(width);
    digest
}

/// Generate credentials whose token is not yet used in `table`.
pub async fn issue(
    policy: &CredentialPolicy,
    kind: &str,
    table: &str,
    destination: &dyn DestinationStore,
) -> Result<Credentials> {
    let password_digest = password_digest(&random_password(policy.password_length), policy.digest_width);

    for attempt in 1..=MAX_TOKEN_ATTEMPTS {
        let token = random_token(policy.token_length);
        let taken = destination
            .find(table, &Predicate::eq(policy.token_column.clone(), token.clone()))
            .await?;
        if taken.is_empty() {
            return Ok(Credentials {
                password_digest,
                token,
            });
        }
        debug!("{}: token collision on attempt {}", kind, attempt);
    }

    Err(MigrateError::row(
        kind,
        None,
        format!("no unique {} after {} attempts", policy.token_column, MAX_TOKEN_ATTEMPTS),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::MemoryStore;

    #[test]
    fn test_password_is_printable() {
        let p = random_password(16);
        assert_eq!(p.len(), 16);
        assert!(p.chars().all(|c| c.is_ascii_graphic()));
    }

    #[test]
    fn test_token_charset() {
        let t = random_token(64);
        assert_eq!(t.len(), 64);
        assert!(t.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_digest_width() {
        let d = password_digest("secret", 32);
        assert_eq!(d.len(), 32);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(d, password_digest("secret", 32));
    }

    #[tokio::test]
    async fn test_issue_writes_columns() {
        let store = MemoryStore::new();
        let policy = CredentialPolicy::new("password", "cookie_string");
        let creds = issue(&policy, "user", "mantis_user_table", &store).await.unwrap();

        let mut row = Record::new().with("username", "bob");
        creds.apply(&policy, &mut row);
        assert_eq!(row.get("password").and_then(|v| v.as_str()).map(str::len), Some(32));
        assert_eq!(row.get("cookie_string").and_then(|v| v.as_str()).map(str::len), Some(64));
    }

    #[tokio::test]
    async fn test_issue_gives_up_when_every_token_collides() {
        // Single-character tokens over a fully occupied charset always collide.
        let store = MemoryStore::new();
        let rows = TOKEN_CHARSET
            .iter()
            .map(|c| Record::new().with("cookie_string", (*c as char).to_string()))
            .collect();
        store.seed("mantis_user_table", rows);

        let mut policy = CredentialPolicy::new("password", "cookie_string");
        policy.token_length = 1;
        let err = issue(&policy, "user", "mantis_user_table", &store).await.unwrap_err();
        assert!(!err.is_fatal());
    }
}
