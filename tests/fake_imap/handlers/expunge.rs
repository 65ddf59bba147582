//! EXPUNGE command handler.
//!
//! Removes every `\Deleted` message from the selected folder and sends
//! `* N EXPUNGE` for each, where N is the sequence number at the time
//! of that removal.

use crate::fake_imap::io::{complete, write_line};
use crate::fake_imap::mailbox::Mailbox;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

pub async fn handle_expunge<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let expunged = {
        let mut mb = mailbox.lock().unwrap();
        selected_folder
            .and_then(|name| mb.get_folder_mut(name))
            .map(|folder| {
                let mut seqs = Vec::new();
                let mut idx = 0;
                while idx < folder.emails.len() {
                    if folder.emails[idx].deleted {
                        folder.emails.remove(idx);
                        seqs.push(idx + 1);
                    } else {
                        idx += 1;
                    }
                }
                seqs
            })
    };

    let Some(seqs) = expunged else {
        complete(stream, tag, "BAD", "No folder selected").await;
        return;
    };
    for seq in seqs {
        if write_line(stream, &format!("* {seq} EXPUNGE\r\n")).await.is_err() {
            return;
        }
    }
    complete(stream, tag, "OK", "EXPUNGE completed").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::testing::raw;
    use crate::fake_imap::io::testing::{output, pipe};
    use crate::fake_imap::mailbox::MailboxBuilder;

    #[tokio::test]
    async fn sequence_numbers_shift_as_messages_go() {
        let mut mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(false, &raw("a"))
            .email(false, &raw("b"))
            .email(false, &raw("c"))
            .build();
        for email in &mut mailbox.get_folder_mut("INBOX").unwrap().emails {
            email.deleted = email.uid != 2;
        }
        let mailbox = Mutex::new(mailbox);

        let (client, mut stream) = pipe();
        handle_expunge("A1", &mailbox, Some("INBOX"), &mut stream).await;
        drop(stream);

        assert_eq!(
            output(client).await,
            "* 1 EXPUNGE\r\n* 2 EXPUNGE\r\nA1 OK EXPUNGE completed\r\n"
        );
        let mb = mailbox.lock().unwrap();
        let uids: Vec<u32> = mb.get_folder("INBOX").unwrap().emails.iter().map(|e| e.uid).collect();
        assert_eq!(uids, vec![2]);
    }
}
