//! User identity for authenticated connections
//!
//! Token validation itself belongs to the surrounding application; the core
//! only consumes it through the [`Authenticator`] trait. A static token table
//! ([`StaticTokenAuthenticator`]) is provided for development and tests.

use crate::config::AuthConfig;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Identity attached to a connection after successful authentication
///
/// Immutable once built, except for the client-instance ID which a client
/// may announce exactly once after authenticating. That ID is what keeps a
/// user from being notified about changes made from the same browser tab.
#[derive(Debug, Clone)]
pub struct UserContext {
    login: String,
    authority: String,
    principal: Option<String>,
    client_id: OnceLock<String>,
}

impl UserContext {
    pub fn new(login: impl Into<String>, authority: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            authority: authority.into(),
            principal: None,
            client_id: OnceLock::new(),
        }
    }

    /// Attach a reference to the authenticating principal
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// The client-instance ID, if the client announced one
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.get().map(String::as_str)
    }

    /// Set the client-instance ID
    ///
    /// Returns `false` (and leaves the stored value untouched) if an ID was
    /// already set.
    pub fn set_client_id(&self, client_id: impl Into<String>) -> bool {
        self.client_id.set(client_id.into()).is_ok()
    }

    /// Account identifier in the form `acct:<login>@<authority>`
    pub fn account_id(&self) -> String {
        format!("acct:{}@{}", self.login, self.authority)
    }
}

/// Resolves bearer tokens into user identities
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Validate an opaque token
    ///
    /// `Ok(None)` means the token is unknown or expired. `Err` is reserved
    /// for failures of the authentication backend itself.
    async fn resolve_user(&self, token: &str) -> Result<Option<UserContext>>;
}

#[derive(Debug, Clone)]
struct TokenIdentity {
    login: String,
    authority: String,
}

/// Authenticator backed by a fixed token table
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, TokenIdentity>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a user
    pub fn with_token(
        mut self,
        token: impl Into<String>,
        login: impl Into<String>,
        authority: impl Into<String>,
    ) -> Self {
        self.tokens.insert(
            token.into(),
            TokenIdentity {
                login: login.into(),
                authority: authority.into(),
            },
        );
        self
    }

    /// Build from the `auth` section of the configuration
    pub fn from_config(config: &AuthConfig) -> Self {
        config.tokens.iter().fold(Self::new(), |auth, entry| {
            auth.with_token(&entry.token, &entry.login, &entry.authority)
        })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn resolve_user(&self, token: &str) -> Result<Option<UserContext>> {
        if token.is_empty() {
            return Ok(None);
        }

        Ok(self.tokens.get(token).map(|identity| {
            UserContext::new(&identity.login, &identity.authority).with_principal(&identity.login)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenEntry;

    #[test]
    fn test_account_id_format() {
        let user = UserContext::new("jane", "example.org");
        assert_eq!(user.account_id(), "acct:jane@example.org");
        assert_eq!(user.login(), "jane");
        assert_eq!(user.authority(), "example.org");
        assert!(user.principal().is_none());
    }

    #[test]
    fn test_client_id_set_exactly_once() {
        let user = UserContext::new("jane", "example.org");
        assert!(user.client_id().is_none());

        assert!(user.set_client_id("tab-1"));
        assert!(!user.set_client_id("tab-2"));
        assert_eq!(user.client_id(), Some("tab-1"));
    }

    #[tokio::test]
    async fn test_static_authenticator_resolves_known_token() {
        let auth = StaticTokenAuthenticator::new().with_token("secret", "jane", "example.org");

        let user = auth.resolve_user("secret").await.unwrap().unwrap();
        assert_eq!(user.account_id(), "acct:jane@example.org");
        assert_eq!(user.principal(), Some("jane"));
    }

    #[tokio::test]
    async fn test_static_authenticator_rejects_unknown_and_empty_tokens() {
        let auth = StaticTokenAuthenticator::new().with_token("secret", "jane", "example.org");

        assert!(auth.resolve_user("other").await.unwrap().is_none());
        assert!(auth.resolve_user("").await.unwrap().is_none());
    }

    #[test]
    fn test_static_authenticator_from_config() {
        let config = AuthConfig {
            tokens: vec![
                TokenEntry {
                    token: "t1".to_string(),
                    login: "jane".to_string(),
                    authority: "example.org".to_string(),
                },
                TokenEntry {
                    token: "t2".to_string(),
                    login: "john".to_string(),
                    authority: "example.org".to_string(),
                },
            ],
        };

        let auth = StaticTokenAuthenticator::from_config(&config);
        assert_eq!(auth.len(), 2);
    }
}
