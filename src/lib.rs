//! Email sync and transmission engine
//!
//! Bridges a multi-tenant webmail service to external IMAP mailbox
//! stores and SMTP relays. Every operation opens its own short-lived
//! session, folder and message listings are cached for a short TTL,
//! and conversations are derived from reply headers on the fly.
//!
//! Start from [`MailEngine`]; account and domain settings are supplied
//! by the caller on every call.

mod cache;
mod config;
mod connection;
mod content;
mod engine;
mod error;
mod fetcher;
mod flag;
mod folder;
mod header;
mod message;
mod store;
mod thread;
mod transmit;

pub use cache::{CacheKey, Operation, ResultCache};
pub use config::{
    AccountId, DomainId, DomainSettings, EngineConfig, MailAccountCredential, TransportSecurity,
};
pub use connection::{Connector, ImapConnector, Session};
pub use engine::MailEngine;
pub use error::{Error, FetchError, PartialItemError, Result, SendError};
pub use fetcher::{Listing, MessageFetcher, ReadMode};
pub use flag::{Flag, FlagOp};
pub use folder::{Folder, MailboxStatistics};
pub use message::{Address, AttachmentInfo, Message};
pub use store::{FetchedItem, FolderStatus, ImapStore, MailStore, RawItem, SearchScope};
pub use thread::{Thread, group as group_threads};
pub use transmit::{Composed, OutgoingAttachment, OutgoingMessage, Relay, SmtpRelay, compose};
