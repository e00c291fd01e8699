//! Credential check for the authority role.
//!
//! Creating a session and rejoining one both require credentials. The
//! check is a trait so deployments can plug in their own source; the
//! bundled [`StaticCredentials`] compares against one fixed pair.
//!
//! # Security
//!
//! [`StaticCredentials`] stores the password in memory as given and
//! compares it directly: no hashing, no rotation, no rate limiting. It
//! matches the single-operator tabletop use case and nothing more.

use std::future::Future;

use crate::SessionError;

/// Validates authority credentials.
///
/// ```rust
/// use tabletop_session::{Authenticator, SessionError};
///
/// /// Lets anyone host. Only for local play.
/// struct OpenDoor;
///
/// impl Authenticator for OpenDoor {
///     async fn authenticate(&self, _user: &str, _password: &str) -> Result<(), SessionError> {
///         Ok(())
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Returns `Ok(())` if the pair may act as authority.
    fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// One fixed username/password pair.
#[derive(Clone)]
pub struct StaticCredentials {
    username: String,
    password: String,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Authenticator for StaticCredentials {
    async fn authenticate(&self, username: &str, password: &str) -> Result<(), SessionError> {
        if username == self.username && password == self.password {
            Ok(())
        } else {
            tracing::warn!(username, "authority credentials rejected");
            Err(SessionError::AuthFailed("invalid username or password".into()))
        }
    }
}
