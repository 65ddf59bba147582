//! UID FETCH command handler.
//!
//! Each message is sent with its UID, flags, and either the header
//! block or the whole message as a counted literal:
//!
//! ```text
//! * <seq> FETCH (UID <uid> FLAGS (\Seen) BODY[HEADER] {<length>}
//! <exactly length bytes>
//! )
//! ```
//!
//! The sequence number is the 1-based position in the folder. Garbled
//! messages are answered without a message section.

use super::extract_uids;
use crate::fake_imap::io::{complete, write_bytes, write_line};
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::sequence::SequenceSet;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

pub async fn handle_uid_fetch<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    header_only: bool,
    mailbox: &Mailbox,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder) = selected_folder.and_then(|name| mailbox.get_folder(name)) else {
        complete(stream, tag, "BAD", "No folder selected").await;
        return;
    };

    let uids = extract_uids(sequence_set, folder.next_uid().saturating_sub(1));
    for (idx, email) in folder.emails.iter().enumerate() {
        if !uids.contains(&email.uid) {
            continue;
        }
        let seq = idx + 1;
        let (uid, flags) = (email.uid, email.flags());

        if email.garbled {
            let line = format!("* {seq} FETCH (UID {uid} FLAGS ({flags}))\r\n");
            if write_line(stream, &line).await.is_err() {
                return;
            }
            continue;
        }

        let (section, data) = if header_only {
            ("BODY[HEADER]", email.header())
        } else {
            ("BODY[]", email.raw.as_slice())
        };
        let head = format!(
            "* {seq} FETCH (UID {uid} FLAGS ({flags}) {section} {{{}}}\r\n",
            data.len()
        );
        if write_line(stream, &head).await.is_err()
            || write_bytes(stream, data).await.is_err()
            || write_line(stream, ")\r\n").await.is_err()
        {
            return;
        }
    }

    complete(stream, tag, "OK", "FETCH completed").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::testing::{raw, uid_set};
    use crate::fake_imap::io::testing::{output, pipe};
    use crate::fake_imap::mailbox::MailboxBuilder;

    async fn run(uids: &[u32], header_only: bool, mailbox: &Mailbox) -> String {
        let (client, mut stream) = pipe();
        handle_uid_fetch("A1", &uid_set(uids), header_only, mailbox, Some("INBOX"), &mut stream)
            .await;
        drop(stream);
        output(client).await
    }

    fn mailbox() -> Mailbox {
        MailboxBuilder::new()
            .folder("INBOX")
            .email(true, &raw("first"))
            .garbled(&raw("second"))
            .build()
    }

    #[tokio::test]
    async fn full_message_literal() {
        let body = raw("first");
        let out = run(&[1], false, &mailbox()).await;
        assert!(out.contains(&format!(
            "* 1 FETCH (UID 1 FLAGS (\\Seen) BODY[] {{{}}}\r\n",
            body.len()
        )));
        assert!(out.contains("\r\nBody)\r\n"));
        assert!(out.ends_with("A1 OK FETCH completed\r\n"));
    }

    #[tokio::test]
    async fn header_section_only() {
        let out = run(&[1], true, &mailbox()).await;
        assert!(out.contains("BODY[HEADER]"));
        assert!(out.contains("Subject: first"));
        assert!(!out.contains("Body)"));
    }

    #[tokio::test]
    async fn garbled_message_has_no_section() {
        let out = run(&[2], true, &mailbox()).await;
        assert!(out.contains("* 2 FETCH (UID 2 FLAGS ())\r\n"));
        assert!(!out.contains("BODY"));
    }

    #[tokio::test]
    async fn missing_uid_returns_only_ok() {
        let out = run(&[99], false, &mailbox()).await;
        assert_eq!(out, "A1 OK FETCH completed\r\n");
    }
}
