//! Message content extraction
//!
//! Walks a parsed MIME tree depth-first and pulls out the first
//! text/plain and text/html bodies plus descriptors for every part
//! disposed as an attachment.

use crate::header;
use crate::message::AttachmentInfo;
use mailparse::body::Body;
use mailparse::{DispositionType, ParsedMail};
use tracing::debug;

/// Bodies and attachment descriptors of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Content {
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub attachments: Vec<AttachmentInfo>,
}

/// Extract bodies and attachments from a parsed message.
///
/// A part disposed as `attachment` never becomes a body, whatever its
/// content type. A non-multipart message is a single body of its own
/// content type.
#[must_use]
pub fn extract(mail: &ParsedMail<'_>) -> Content {
    let mut content = Content::default();
    walk(mail, &mut content);
    content
}

fn walk(part: &ParsedMail<'_>, content: &mut Content) {
    if part.get_content_disposition().disposition == DispositionType::Attachment {
        content.attachments.push(describe(part));
        return;
    }

    if part.ctype.mimetype.starts_with("multipart/") {
        for sub in &part.subparts {
            walk(sub, content);
        }
        return;
    }

    match part.ctype.mimetype.as_str() {
        "text/plain" if content.body_text.is_none() => {
            content.body_text = Some(text_of(part));
        }
        "text/html" if content.body_html.is_none() => {
            content.body_html = Some(text_of(part));
        }
        _ => {}
    }
}

fn describe(part: &ParsedMail<'_>) -> AttachmentInfo {
    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map_or_else(|| "untitled".to_string(), |name| header::decode_str(name));

    AttachmentInfo {
        filename,
        content_type: part.ctype.mimetype.clone(),
        size: body_bytes(part).len() as u64,
    }
}

fn text_of(part: &ParsedMail<'_>) -> String {
    header::decode_text(&body_bytes(part), Some(&part.ctype.charset))
}

/// Transfer-decoded body, or the undecoded bytes when the transfer
/// encoding is broken.
fn body_bytes(part: &ParsedMail<'_>) -> Vec<u8> {
    part.get_body_raw().unwrap_or_else(|e| {
        debug!("Keeping undecoded body: {}", e);
        match part.get_body_encoded() {
            Body::Base64(body) | Body::QuotedPrintable(body) => body.get_raw().to_vec(),
            Body::SevenBit(body) | Body::EightBit(body) => body.get_raw().to_vec(),
            Body::Binary(body) => body.get_raw().to_vec(),
        }
    })
}
