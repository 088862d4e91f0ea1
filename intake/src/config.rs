use crate::signature::HashAlgorithm;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Listener and admin listener both bind {0}")]
    ListenerClash(String),

    #[error("Store timeout must be greater than 0")]
    InvalidStoreTimeout,

    #[error("Request body limit must be greater than 0")]
    InvalidBodyLimit,

    #[error("SQLite store needs at least one connection")]
    InvalidPoolSize,

    #[error("SQLite store url cannot be empty")]
    EmptyStoreUrl,
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Storage backend selection
#[derive(Clone, Debug, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// Process-local store, for development and tests
    #[default]
    Memory,
    /// SQLite database, e.g. `sqlite://bugdesk.db`
    Sqlite {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// How long a connection waits on a locked database
        #[serde(default = "default_busy_timeout_ms")]
        busy_timeout_ms: u64,
    },
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_max_body_bytes() -> usize {
    // Reports carry base64 screenshots of every open window.
    16 * 1024 * 1024
}

/// Intake service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Public API listener
    #[serde(default)]
    pub listener: Listener,
    /// Optional listener for `/health` and `/ready`
    #[serde(default)]
    pub admin_listener: Option<Listener>,
    #[serde(default)]
    pub store: StoreConfig,
    /// Upper bound for every store call made while serving a request
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default)]
    pub signature_hash: HashAlgorithm,
    /// Include raw store errors in failure responses. Debugging aid only;
    /// store errors can reveal internals to untrusted clients.
    #[serde(default)]
    pub expose_store_errors: bool,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            admin_listener: None,
            store: StoreConfig::default(),
            store_timeout_ms: default_store_timeout_ms(),
            signature_hash: HashAlgorithm::default(),
            expose_store_errors: false,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;

        if let Some(admin) = &self.admin_listener {
            admin.validate()?;
            if admin == &self.listener {
                return Err(ValidationError::ListenerClash(admin.addr()));
            }
        }

        if self.store_timeout_ms == 0 {
            return Err(ValidationError::InvalidStoreTimeout);
        }

        if self.max_body_bytes == 0 {
            return Err(ValidationError::InvalidBodyLimit);
        }

        if let StoreConfig::Sqlite {
            url,
            max_connections,
            ..
        } = &self.store
        {
            if url.trim().is_empty() {
                return Err(ValidationError::EmptyStoreUrl);
            }
            if *max_connections == 0 {
                return Err(ValidationError::InvalidPoolSize);
            }
        }

        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
