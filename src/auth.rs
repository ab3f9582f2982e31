//! 访问凭据以及拥有它们的外部存储。
//!
//! Bearer credentials and the external store that owns them.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// 不透明的访问令牌。`Debug` 输出不会打印其值。
///
/// An opaque bearer token. The value is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken(<{} bytes>)", self.0.len())
    }
}

impl From<&str> for AuthToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AuthToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 外部拥有的凭据生命周期。
///
/// 连接子系统只读取它，唯一的例外是使被服务器拒绝的令牌失效。
///
/// The externally-owned credential lifecycle.
///
/// The connection subsystem only reads from it, except to invalidate a token the
/// server has rejected.
pub trait CredentialStore: Send + Sync + 'static {
    fn get(&self) -> Option<AuthToken>;
    fn set(&self, token: AuthToken);
    fn clear(&self);
}

/// An in-memory [`CredentialStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    token: Arc<RwLock<Option<AuthToken>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<AuthToken>) -> Self {
        let store = Self::new();
        store.set(token.into());
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<AuthToken> {
        self.token.read().clone()
    }

    fn set(&self, token: AuthToken) {
        *self.token.write() = Some(token);
    }

    fn clear(&self) {
        *self.token.write() = None;
    }
}
