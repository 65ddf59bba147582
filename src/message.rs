//! Message records
//!
//! A [`Message`] is a point-in-time snapshot of one stored message,
//! built either from its header block (listings) or from the full raw
//! message (detail fetches).

use crate::content;
use crate::error::{FetchError, PartialItemError};
use crate::flag::Flag;
use crate::header;
use chrono::{DateTime, Utc};
use mailparse::{MailAddr, MailHeader, MailHeaderMap};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// A mailbox address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub name: Option<String>,
    pub email: String,
}

impl Address {
    #[must_use]
    pub fn new(name: Option<&str>, email: impl Into<String>) -> Self {
        Self {
            name: name.map(str::to_string),
            email: email.into(),
        }
    }

    /// Parse an address-list header value. Group syntax is flattened;
    /// a value that does not parse as a list is kept as one address.
    #[must_use]
    pub fn parse_list(raw: &[u8]) -> Vec<Self> {
        let value: String = header::text(raw)
            .chars()
            .filter(|c| !matches!(c, '\r' | '\n'))
            .collect();
        if value.trim().is_empty() {
            return Vec::new();
        }

        match mailparse::addrparse(&value) {
            Ok(list) => list
                .iter()
                .flat_map(|addr| match addr {
                    MailAddr::Single(info) => vec![info.clone()],
                    MailAddr::Group(group) => group.addrs.clone(),
                })
                .map(|info| Self {
                    name: info
                        .display_name
                        .map(|n| header::decode_str(&n))
                        .filter(|n| !n.is_empty()),
                    email: info.addr.trim().to_string(),
                })
                .collect(),
            Err(e) => {
                debug!("Unparseable address list {:?}: {}", value, e);
                vec![Self::new(None, header::decode_str(&value))]
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} <{}>", self.email),
            None => f.write_str(&self.email),
        }
    }
}

/// Descriptor of one attachment; the payload itself is never held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned UID, unique within `folder`.
    pub id: u32,
    pub subject: String,
    pub sender: Address,
    /// To and Cc recipients, in header order.
    pub recipients: Vec<Address>,
    pub date: DateTime<Utc>,
    /// Set when the Date header was missing or unparseable and `date`
    /// holds the time the message was read instead.
    #[serde(skip)]
    pub date_is_fallback: bool,
    pub is_read: bool,
    pub has_attachments: bool,
    pub folder: String,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub attachments: Vec<AttachmentInfo>,
}

impl Message {
    /// Build a listing entry from a header block and flags.
    ///
    /// Attachments are approximated from the top-level content type.
    pub(crate) fn from_header_block(
        uid: u32,
        folder: &str,
        flags: &[Flag],
        raw_headers: &[u8],
    ) -> Result<Self, PartialItemError> {
        let (headers, _) =
            mailparse::parse_headers(raw_headers).map_err(|e| PartialItemError {
                uid: Some(uid),
                reason: format!("unparseable header block: {e}"),
            })?;

        let mut message = Self::from_headers(uid, folder, flags, &headers);
        message.has_attachments = headers
            .get_first_value("Content-Type")
            .is_some_and(|v| mailparse::parse_content_type(&v).mimetype == "multipart/mixed");
        Ok(message)
    }

    /// Build a full record, bodies and attachments included, from the
    /// raw RFC 5322 message.
    pub(crate) fn from_raw(
        uid: u32,
        folder: &str,
        flags: &[Flag],
        raw: &[u8],
    ) -> Result<Self, FetchError> {
        let parsed = mailparse::parse_mail(raw)
            .map_err(|e| FetchError::Malformed(format!("message {uid}: {e}")))?;

        let mut message = Self::from_headers(uid, folder, flags, &parsed.headers);
        let content = content::extract(&parsed);
        message.has_attachments = !content.attachments.is_empty();
        message.body_text = content.body_text;
        message.body_html = content.body_html;
        message.attachments = content.attachments;
        Ok(message)
    }

    fn from_headers(uid: u32, folder: &str, flags: &[Flag], headers: &[MailHeader<'_>]) -> Self {
        let raw = |name: &str| headers.get_first_header(name).map(MailHeader::get_value_raw);

        let sender = raw("From")
            .map(Address::parse_list)
            .and_then(|list| list.into_iter().next())
            .unwrap_or_else(|| Address::new(None, ""));

        let mut recipients = raw("To").map(Address::parse_list).unwrap_or_default();
        recipients.extend(raw("Cc").map(Address::parse_list).unwrap_or_default());

        let date = raw("Date").map(header::decode).and_then(|d| parse_date(&d));

        let message_id = raw("Message-ID")
            .map(header::decode)
            .and_then(|v| message_ids(&v).into_iter().next())
            .unwrap_or_else(|| format!("<{uid}.{folder}@local>"));

        Self {
            id: uid,
            subject: raw("Subject").map(header::decode).unwrap_or_default(),
            sender,
            recipients,
            date_is_fallback: date.is_none(),
            date: date.unwrap_or_else(Utc::now),
            is_read: flags.contains(&Flag::Seen),
            has_attachments: false,
            folder: folder.to_string(),
            message_id,
            in_reply_to: raw("In-Reply-To")
                .map(header::decode)
                .and_then(|v| message_ids(&v).into_iter().next()),
            references: raw("References")
                .map(|v| message_ids(&header::decode(v)))
                .unwrap_or_default(),
            body_text: None,
            body_html: None,
            attachments: Vec::new(),
        }
    }
}

/// Message ids in a Message-ID, In-Reply-To, or References value.
///
/// Angle-bracketed ids are preferred; a value without brackets is
/// split on whitespace.
fn message_ids(value: &str) -> Vec<String> {
    let bracketed: Vec<String> = value
        .split('<')
        .skip(1)
        .filter_map(|chunk| chunk.split_once('>'))
        .map(|(id, _)| id.trim())
        .filter(|id| !id.is_empty())
        .map(|id| format!("<{id}>"))
        .collect();
    if !bracketed.is_empty() {
        return bracketed;
    }
    value.split_whitespace().map(str::to_string).collect()
}

/// Parse a Date header, tolerating trailing comments and the sloppy
/// formats mailers produce.
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    let without_comment = trimmed
        .rfind('(')
        .filter(|_| trimmed.ends_with(')'))
        .map_or(trimmed, |i| trimmed[..i].trim_end());

    DateTime::parse_from_rfc2822(without_comment)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            mailparse::dateparse(trimmed)
                .ok()
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
        })
}
