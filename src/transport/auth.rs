use std::{collections::HashMap, fmt};

pub const ANONYMOUS: &str = "ANONYMOUS";
pub const PLAIN: &str = "PLAIN";

/// What a client presents when a connection is established.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub mechanism: String,
    pub principal: String,
    pub secret: String,
    pub realm: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("mechanism", &self.mechanism)
            .field("principal", &self.principal)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

/// Client-side authentication capability.
pub trait Authenticator: Send + Sync + fmt::Debug {
    fn credentials(&self) -> Credentials;

    /// Stable identity of this authenticator. Connections are only shared
    /// between callers whose authenticators report the same identity.
    fn identity(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl Authenticator for Anonymous {
    fn credentials(&self) -> Credentials {
        Credentials {
            mechanism: ANONYMOUS.to_string(),
            principal: String::new(),
            secret: String::new(),
            realm: String::new(),
        }
    }

    fn identity(&self) -> String {
        ANONYMOUS.to_lowercase()
    }
}

#[derive(Clone)]
pub struct PasswordAuthenticator {
    principal: String,
    password: String,
    realm: String,
}

impl PasswordAuthenticator {
    pub fn new(principal: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            password: password.into(),
            realm: String::new(),
        }
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }
}

impl fmt::Debug for PasswordAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordAuthenticator")
            .field("principal", &self.principal)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

impl Authenticator for PasswordAuthenticator {
    fn credentials(&self) -> Credentials {
        Credentials {
            mechanism: PLAIN.to_string(),
            principal: self.principal.clone(),
            secret: self.password.clone(),
            realm: self.realm.clone(),
        }
    }

    fn identity(&self) -> String {
        format!("password:{}@{}", self.principal, self.realm)
    }
}

/// Server-side check of the credentials presented by a connecting client.
///
/// Returns the authenticated principal, or the reason for rejecting it.
pub trait AuthenticationHandler: Send + Sync {
    fn authenticate(&self, credentials: &Credentials) -> Result<String, String>;
}

/// Accepts every client.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAnonymous;

impl AuthenticationHandler for AllowAnonymous {
    fn authenticate(&self, credentials: &Credentials) -> Result<String, String> {
        if credentials.principal.is_empty() {
            Ok(ANONYMOUS.to_lowercase())
        } else {
            Ok(credentials.principal.clone())
        }
    }
}

/// Accepts only `PLAIN` credentials matching a known user.
#[derive(Debug, Clone, Default)]
pub struct PasswordRealm {
    users: HashMap<String, String>,
}

impl PasswordRealm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, name: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(name.into(), password.into());
        self
    }
}

impl AuthenticationHandler for PasswordRealm {
    fn authenticate(&self, credentials: &Credentials) -> Result<String, String> {
        if credentials.mechanism != PLAIN {
            return Err(format!(
                "mechanism '{}' is not allowed",
                credentials.mechanism
            ));
        }
        match self.users.get(&credentials.principal) {
            Some(password) if *password == credentials.secret => {
                Ok(credentials.principal.clone())
            }
            _ => Err(format!(
                "invalid credentials for '{}'",
                credentials.principal
            )),
        }
    }
}
