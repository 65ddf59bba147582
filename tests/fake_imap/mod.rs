//! Fake IMAP server for integration testing
//!
//! An in-process server speaking enough IMAP to drive `mailsync`'s
//! `ImapConnector` end to end, in any of the three transport modes:
//!
//! plain TCP, implicit TLS, or TCP -> STARTTLS -> TLS, then
//! LOGIN -> commands -> LOGOUT.
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS setup, connection counters, dispatch
//! - `handlers/` -- one file per IMAP command
//! - `mailbox` -- test data model (folders, messages, builder)
//! - `io` -- shared write helpers

mod handlers;

pub use mailbox::MailboxBuilder;
pub use server::{FakeImapServer, Options};
