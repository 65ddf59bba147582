//! UID COPY command handler.
//!
//! Copies get fresh UIDs in the destination folder, as on a real
//! server. An unknown destination is refused with `NO [TRYCREATE]`.

use super::extract_uids;
use crate::fake_imap::io::complete;
use crate::fake_imap::mailbox::{Mailbox, TestEmail};
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

enum Outcome {
    Copied,
    NoSource,
    NoDestination,
}

pub async fn handle_uid_copy<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    dest_folder: &str,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let outcome = {
        let mut mb = mailbox.lock().unwrap();
        copy(&mut mb, sequence_set, selected_folder, dest_folder)
    };

    match outcome {
        Outcome::Copied => complete(stream, tag, "OK", "COPY completed").await,
        Outcome::NoSource => complete(stream, tag, "BAD", "No folder selected").await,
        Outcome::NoDestination => {
            complete(stream, tag, "NO", "[TRYCREATE] Destination folder not found").await;
        }
    }
}

fn copy(
    mb: &mut Mailbox,
    sequence_set: &SequenceSet,
    source: Option<&str>,
    dest: &str,
) -> Outcome {
    let Some(source) = source.and_then(|name| mb.get_folder(name)) else {
        return Outcome::NoSource;
    };
    let uids = extract_uids(sequence_set, source.next_uid().saturating_sub(1));
    let copies: Vec<TestEmail> = source
        .emails
        .iter()
        .filter(|e| uids.contains(&e.uid))
        .cloned()
        .collect();

    let Some(dest) = mb.get_folder_mut(dest) else {
        return Outcome::NoDestination;
    };
    for mut email in copies {
        email.uid = dest.next_uid();
        email.deleted = false;
        dest.emails.push(email);
    }
    Outcome::Copied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::testing::{raw, uid_set};
    use crate::fake_imap::io::testing::{output, pipe};
    use crate::fake_imap::mailbox::MailboxBuilder;

    async fn run(dest: &str, mailbox: &Mutex<Mailbox>) -> String {
        let (client, mut stream) = pipe();
        handle_uid_copy("A1", &uid_set(&[2]), dest, mailbox, Some("INBOX"), &mut stream).await;
        drop(stream);
        output(client).await
    }

    #[tokio::test]
    async fn copies_with_new_uid() {
        let mailbox = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(false, &raw("a"))
                .email(true, &raw("b"))
                .folder("Archive")
                .email(true, &raw("old"))
                .build(),
        );
        let out = run("Archive", &mailbox).await;
        assert_eq!(out, "A1 OK COPY completed\r\n");

        let mb = mailbox.lock().unwrap();
        let archive = mb.get_folder("Archive").unwrap();
        assert_eq!(archive.emails.len(), 2);
        assert_eq!(archive.emails[1].uid, 2);
        assert!(archive.emails[1].seen);
        assert_eq!(mb.get_folder("INBOX").unwrap().emails.len(), 2);
    }

    #[tokio::test]
    async fn unknown_destination_is_trycreate() {
        let mailbox = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(false, &raw("a"))
                .email(false, &raw("b"))
                .build(),
        );
        let out = run("Nope", &mailbox).await;
        assert!(out.starts_with("A1 NO [TRYCREATE]"));
    }
}
