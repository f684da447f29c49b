use std::env;
use std::fmt;

use anyhow::{Context, Result};

const SERVICE_PREFIX: &str = "realm-cli";

const FIELD_USERNAME: &str = "username";
const FIELD_API_KEY: &str = "api_key";
const FIELD_ACCESS_TOKEN: &str = "access_token";
const FIELD_REFRESH_TOKEN: &str = "refresh_token";

/// A user's login material and current session tokens.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub api_key: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("api_key", &self.redacted_api_key())
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

fn redact(token: &str) -> &'static str {
    if token.is_empty() { "" } else { "<redacted>" }
}

impl Credentials {
    pub fn logged_in(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// The API key with every dash-separated group but the last masked.
    pub fn redacted_api_key(&self) -> String {
        let parts: Vec<&str> = self.api_key.split('-').collect();
        let last = parts.len() - 1;
        parts
            .iter()
            .enumerate()
            .map(|(i, part)| {
                if i == last {
                    part.to_string()
                } else {
                    "*".repeat(part.len())
                }
            })
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// Where session credentials live between invocations.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Credentials>;
    fn save(&self, credentials: &Credentials) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// OS keyring storage, one entry per field, namespaced by profile.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(profile: &str) -> Self {
        Self {
            service: format!("{SERVICE_PREFIX}:{profile}"),
        }
    }

    fn entry(&self, field: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, field)
            .with_context(|| format!("Failed to create keyring entry for {field}"))
    }

    fn get(&self, field: &str) -> Result<String> {
        match self.entry(field)?.get_password() {
            Ok(value) => Ok(value),
            Err(keyring::Error::NoEntry) => Ok(String::new()),
            Err(err) => Err(err).with_context(|| format!("Failed to read {field} from keyring")),
        }
    }

    fn set(&self, field: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            return self.remove(field);
        }
        self.entry(field)?
            .set_password(value)
            .with_context(|| format!("Failed to store {field} in keyring"))
    }

    fn remove(&self, field: &str) -> Result<()> {
        match self.entry(field)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Failed to remove {field} from keyring")),
        }
    }
}

impl SessionStore for KeyringStore {
    fn load(&self) -> Result<Credentials> {
        // Environment tokens win so CI can run without a keyring.
        if let (Ok(access_token), Ok(refresh_token)) = (
            env::var("REALM_ACCESS_TOKEN"),
            env::var("REALM_REFRESH_TOKEN"),
        ) {
            return Ok(Credentials {
                username: env::var("REALM_USERNAME").unwrap_or_default(),
                api_key: env::var("REALM_API_KEY").unwrap_or_default(),
                access_token,
                refresh_token,
            });
        }

        Ok(Credentials {
            username: self.get(FIELD_USERNAME)?,
            api_key: self.get(FIELD_API_KEY)?,
            access_token: self.get(FIELD_ACCESS_TOKEN)?,
            refresh_token: self.get(FIELD_REFRESH_TOKEN)?,
        })
    }

    fn save(&self, credentials: &Credentials) -> Result<()> {
        self.set(FIELD_USERNAME, &credentials.username)?;
        self.set(FIELD_API_KEY, &credentials.api_key)?;
        self.set(FIELD_ACCESS_TOKEN, &credentials.access_token)?;
        self.set(FIELD_REFRESH_TOKEN, &credentials.refresh_token)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        for field in [
            FIELD_USERNAME,
            FIELD_API_KEY,
            FIELD_ACCESS_TOKEN,
            FIELD_REFRESH_TOKEN,
        ] {
            self.remove(field)?;
        }
        Ok(())
    }
}

/// In-process store, used by tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    inner: std::sync::Mutex<Credentials>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn with(credentials: Credentials) -> Self {
        Self {
            inner: std::sync::Mutex::new(credentials),
        }
    }

    pub fn snapshot(&self) -> Credentials {
        self.inner.lock().expect("memory store lock").clone()
    }
}

#[cfg(test)]
impl SessionStore for MemoryStore {
    fn load(&self) -> Result<Credentials> {
        Ok(self.snapshot())
    }

    fn save(&self, credentials: &Credentials) -> Result<()> {
        *self.inner.lock().expect("memory store lock") = credentials.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.inner.lock().expect("memory store lock") = Credentials::default();
        Ok(())
    }
}
