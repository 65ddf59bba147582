//! Engine and connection configuration
//!
//! Account credentials and domain settings are owned by the calling
//! service and handed to every [`MailEngine`](crate::MailEngine) call.
//! [`EngineConfig`] holds the engine's own tunables.

use crate::error::{Error, Result};
use std::env;
use std::fmt;
use std::time::Duration;

/// Identifier of a mail account, as assigned by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub String);

/// Identifier of a mail domain, as assigned by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(pub String);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for DomainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How the transport to a store or relay is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSecurity {
    /// TLS from the first byte (IMAPS 993, SMTPS 465).
    Implicit,
    /// Plain connection upgraded with STARTTLS.
    StartTls,
    /// No transport security.
    Plain,
}

impl From<bool> for TransportSecurity {
    /// Maps the legacy per-domain `use_ssl` flag.
    fn from(use_ssl: bool) -> Self {
        if use_ssl { Self::Implicit } else { Self::Plain }
    }
}

impl TransportSecurity {
    #[must_use]
    pub const fn is_secure(self) -> bool {
        !matches!(self, Self::Plain)
    }
}

/// Server addresses and transport security for one mail domain.
#[derive(Debug, Clone)]
pub struct DomainSettings {
    pub id: DomainId,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub security: TransportSecurity,
    /// Skip certificate verification, for self-signed bridges.
    pub accept_invalid_certs: bool,
}

/// Credentials for one mailbox on a domain.
#[derive(Clone)]
pub struct MailAccountCredential {
    pub account_id: AccountId,
    pub domain_id: DomainId,
    pub email_address: String,
    pub username: String,
    pub secret: String,
}

impl fmt::Debug for MailAccountCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailAccountCredential")
            .field("account_id", &self.account_id)
            .field("domain_id", &self.domain_id)
            .field("email_address", &self.email_address)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Tunables for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a cached folder or message listing stays valid.
    pub cache_ttl: Duration,
    /// Maximum number of cached listings before LRU eviction.
    pub cache_capacity: usize,
    /// Messages fetched per store round-trip when listing.
    pub batch_size: usize,
    /// Bound on connecting and on every single store or relay call.
    pub operation_timeout: Duration,
}

const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_CAPACITY: usize = 512;
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            operation_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl EngineConfig {
    /// Load engine configuration from environment variables
    ///
    /// Reads from `.env` file if present. All variables are optional:
    /// - `MAILSYNC_CACHE_TTL_SECS` (default: `300`)
    /// - `MAILSYNC_CACHE_CAPACITY` (default: `512`)
    /// - `MAILSYNC_BATCH_SIZE` (default: `10`)
    /// - `MAILSYNC_TIMEOUT_SECS` (default: `30`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but is not a
    /// valid number, or if capacity or batch size is zero.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
            default: T,
        ) -> Result<T>
        where
            T::Err: fmt::Display,
        {
            lookup(key).map_or(Ok(default), |v| {
                v.trim()
                    .parse()
                    .map_err(|e| Error::Config(format!("Invalid {key}: {e}")))
            })
        }

        let cache_capacity = parsed(&lookup, "MAILSYNC_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY)?;
        let batch_size = parsed(&lookup, "MAILSYNC_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        if cache_capacity == 0 {
            return Err(Error::Config(
                "MAILSYNC_CACHE_CAPACITY must be positive".into(),
            ));
        }
        if batch_size == 0 {
            return Err(Error::Config("MAILSYNC_BATCH_SIZE must be positive".into()));
        }

        Ok(Self {
            cache_ttl: Duration::from_secs(parsed(
                &lookup,
                "MAILSYNC_CACHE_TTL_SECS",
                DEFAULT_CACHE_TTL_SECS,
            )?),
            cache_capacity,
            batch_size,
            operation_timeout: Duration::from_secs(parsed(
                &lookup,
                "MAILSYNC_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )?),
        })
    }
}
