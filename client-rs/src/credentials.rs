//! Bearer token lookup for the handshake
//!
//! The token is fetched when the server says `Hello`, never earlier, so a
//! refreshed cookie is picked up by the next handshake.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Supplies the bearer token carried in `HelloReply`
pub trait CredentialProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// A fixed token
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

/// Shared cookie store. Clones see the same cookies.
#[derive(Clone, Default)]
pub struct CookieJar {
    cookies: Arc<RwLock<HashMap<String, String>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a jar from a `Cookie` header value (`a=1; b=2`)
    pub fn from_header(header: &str) -> Self {
        let jar = Self::new();
        jar.parse_header(header);
        jar
    }

    /// Merge the cookies of a `Cookie` header value. Pairs without `=` are
    /// skipped; surrounding double quotes around values are removed.
    pub fn parse_header(&self, header: &str) {
        let mut cookies = self.cookies.write();
        for pair in header.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            cookies.insert(name.to_string(), value.to_string());
        }
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.write().insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.cookies.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        self.cookies.write().remove(name)
    }
}

impl fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cookies = self.cookies.read();
        let mut names: Vec<&String> = cookies.keys().collect();
        names.sort();
        f.debug_struct("CookieJar").field("names", &names).finish()
    }
}

/// Reads the token from a named cookie on every handshake
#[derive(Debug, Clone)]
pub struct CookieCredentials {
    jar: CookieJar,
    name: String,
}

impl CookieCredentials {
    pub fn new(jar: CookieJar, name: impl Into<String>) -> Self {
        Self {
            jar,
            name: name.into(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.name
    }
}

impl CredentialProvider for CookieCredentials {
    fn token(&self) -> Option<String> {
        self.jar.get(&self.name)
    }
}
