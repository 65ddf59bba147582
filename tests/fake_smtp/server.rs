//! In-process fake SMTP server
//!
//! Replies are single lines except the EHLO capability list. A
//! delivery is recorded only once DATA is accepted, so a transaction
//! that fails part-way leaves no trace.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// How the server behaves.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Answer every AUTH with `535 5.7.8`.
    pub reject_logins: bool,
    /// Recipients answered with `550 5.1.1` at RCPT.
    pub unknown_recipients: Vec<String>,
}

/// One accepted message as the relay saw it.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    pub from: String,
    pub recipients: Vec<String>,
    pub data: String,
}

struct Shared {
    options: Options,
    deliveries: Mutex<Vec<Delivery>>,
}

pub struct FakeSmtpServer {
    port: u16,
    shared: Arc<Shared>,
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeSmtpServer {
    pub async fn start(options: Options) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(Shared {
            options,
            deliveries: Mutex::new(Vec::new()),
        });

        let accept_shared = Arc::clone(&shared);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _addr)) = listener.accept().await {
                let shared = Arc::clone(&accept_shared);
                tokio::spawn(async move {
                    let _ = handle_connection(stream, &shared).await;
                });
            }
        });

        Self {
            port,
            shared,
            _handle: handle,
        }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn deliveries(&self) -> MutexGuard<'_, Vec<Delivery>> {
        self.shared.deliveries.lock().unwrap()
    }
}

fn mailbox_arg(line: &str) -> String {
    line.split_once(':')
        .map(|(_, rest)| rest.trim())
        .unwrap_or_default()
        .trim_start_matches('<')
        .split('>')
        .next()
        .unwrap_or_default()
        .to_string()
}

async fn reply(stream: &mut BufReader<TcpStream>, text: &str) -> std::io::Result<()> {
    stream.get_mut().write_all(text.as_bytes()).await?;
    stream.get_mut().flush().await
}

async fn handle_connection(stream: TcpStream, shared: &Shared) -> std::io::Result<()> {
    let mut stream = BufReader::new(stream);
    reply(&mut stream, "220 fake.smtp ESMTP ready\r\n").await?;

    let mut current = Delivery::default();
    loop {
        let mut line = String::new();
        if stream.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end();
        let verb = command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        match verb.as_str() {
            "EHLO" => {
                reply(&mut stream, "250-fake.smtp\r\n250-AUTH PLAIN\r\n250 8BITMIME\r\n").await?;
            }
            "HELO" => reply(&mut stream, "250 fake.smtp\r\n").await?,
            "AUTH" if shared.options.reject_logins => {
                reply(&mut stream, "535 5.7.8 Authentication credentials invalid\r\n").await?;
            }
            "AUTH" => reply(&mut stream, "235 2.7.0 Authentication successful\r\n").await?,
            "MAIL" => {
                current = Delivery {
                    from: mailbox_arg(command),
                    ..Delivery::default()
                };
                reply(&mut stream, "250 2.1.0 Ok\r\n").await?;
            }
            "RCPT" => {
                let recipient = mailbox_arg(command);
                if shared.options.unknown_recipients.contains(&recipient) {
                    reply(&mut stream, "550 5.1.1 No such user\r\n").await?;
                } else {
                    current.recipients.push(recipient);
                    reply(&mut stream, "250 2.1.5 Ok\r\n").await?;
                }
            }
            "DATA" => {
                reply(&mut stream, "354 End data with <CR><LF>.<CR><LF>\r\n").await?;
                loop {
                    let mut data_line = String::new();
                    if stream.read_line(&mut data_line).await? == 0 {
                        return Ok(());
                    }
                    if data_line == ".\r\n" {
                        break;
                    }
                    current.data.push_str(&data_line);
                }
                shared
                    .deliveries
                    .lock()
                    .unwrap()
                    .push(std::mem::take(&mut current));
                reply(&mut stream, "250 2.0.0 Ok: queued\r\n").await?;
            }
            "RSET" => {
                current = Delivery::default();
                reply(&mut stream, "250 2.0.0 Ok\r\n").await?;
            }
            "NOOP" => reply(&mut stream, "250 2.0.0 Ok\r\n").await?,
            "QUIT" => {
                reply(&mut stream, "221 2.0.0 Bye\r\n").await?;
                return Ok(());
            }
            _ => reply(&mut stream, "502 5.5.2 Command not recognized\r\n").await?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_argument_is_unbracketed() {
        assert_eq!(mailbox_arg("MAIL FROM:<me@example.com> BODY=8BITMIME"), "me@example.com");
        assert_eq!(mailbox_arg("RCPT TO:<x@y.com>"), "x@y.com");
    }
}
