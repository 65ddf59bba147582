//! Fake SMTP relay for integration testing
//!
//! An in-process plain-TCP server speaking enough ESMTP to drive
//! `mailsync`'s `SmtpRelay`:
//!
//! greeting -> EHLO -> AUTH PLAIN -> MAIL FROM -> RCPT TO* -> DATA -> QUIT
//!
//! It can reject every login, or individual recipients, and records
//! each accepted delivery.

mod server;

pub use server::{Delivery, FakeSmtpServer, Options};
