//! LOGIN command handler.
//!
//! Any credentials are accepted unless the server was started with
//! `reject_logins`.

use crate::fake_imap::io::complete;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Returns whether the client is now authenticated.
pub async fn handle_login<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    reject: bool,
    stream: &mut BufReader<S>,
) -> bool {
    if reject {
        complete(stream, tag, "NO", "[AUTHENTICATIONFAILED] Invalid credentials").await;
        false
    } else {
        complete(stream, tag, "OK", "LOGIN completed").await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::io::testing::{output, pipe};

    #[tokio::test]
    async fn accepts_by_default() {
        let (client, mut stream) = pipe();
        assert!(handle_login("A0001", false, &mut stream).await);
        drop(stream);
        assert_eq!(output(client).await, "A0001 OK LOGIN completed\r\n");
    }

    #[tokio::test]
    async fn rejects_with_response_code() {
        let (client, mut stream) = pipe();
        assert!(!handle_login("A0001", true, &mut stream).await);
        drop(stream);
        assert!(output(client).await.starts_with("A0001 NO [AUTHENTICATIONFAILED]"));
    }
}
