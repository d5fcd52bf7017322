//! Session tokens: the bearer credential presented on every transfer.

use std::fmt;
use std::sync::Arc;

use rand::RngCore;

/// Random bytes behind a generated token (32 hex characters).
const TOKEN_BYTES: usize = 16;

/// Opaque session token, cheap to clone and share across tasks.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(Arc<str>);

impl SessionToken {
    /// Generates a fresh CSPRNG token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes).into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares a presented token against this one in constant time
    /// (for equal lengths).
    pub fn matches(&self, presented: &str) -> bool {
        let expected = self.0.as_bytes();
        let presented = presented.as_bytes();
        if expected.len() != presented.len() {
            return false;
        }
        expected
            .iter()
            .zip(presented)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
    }
}

impl From<&str> for SessionToken {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for SessionToken {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken(<{} chars>)", self.0.len())
    }
}
