//! # Authorization Boundary
//!
//! Token acquisition and refresh live outside this crate. The client only
//! needs something that can hand out the current bearer token and say when
//! the user has to log in again; [`TokenSource`] is that seam. The WebSocket
//! transport uses it to decorate the upgrade request.

use std::sync::RwLock;

use tokio::sync::watch;

/// Supplier of bearer tokens.
pub trait TokenSource: Send + Sync {
    /// The current access token, if one is available.
    fn access_token(&self) -> Option<String>;

    /// Value for the `Authorization` header.
    fn authorization_header(&self) -> Option<String> {
        self.access_token().map(|token| format!("Bearer {}", token))
    }

    /// Emits `true` whenever the user needs to log in again.
    fn needs_login(&self) -> watch::Receiver<bool>;
}

/// A fixed token, replaceable at runtime. Useful for service accounts and tests.
pub struct StaticToken {
    token: RwLock<Option<String>>,
    needs_login: watch::Sender<bool>,
}

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        let (needs_login, _) = watch::channel(token.is_none());
        Self {
            token: RwLock::new(token),
            needs_login,
        }
    }

    /// Swaps the token; clearing it raises the "needs login" signal.
    pub fn set_token(&self, token: Option<String>) {
        let missing = token.is_none();
        *self.token.write().expect("Token lock poisoned") = token;
        self.needs_login.send_replace(missing);
    }
}

impl TokenSource for StaticToken {
    fn access_token(&self) -> Option<String> {
        self.token.read().expect("Token lock poisoned").clone()
    }

    fn needs_login(&self) -> watch::Receiver<bool> {
        self.needs_login.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_token_header_and_login_signal() {
        let source = StaticToken::new(Some("abc".into()));
        let login = source.needs_login();
        assert_eq!(source.authorization_header().as_deref(), Some("Bearer abc"));
        assert!(!*login.borrow());

        source.set_token(None);
        assert_eq!(source.authorization_header(), None);
        assert!(*login.borrow());
    }
}
