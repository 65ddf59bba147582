//! Per-operation store sessions
//!
//! Every logical operation opens its own authenticated session through
//! a [`Connector`] and releases it when done. Sessions are never
//! pooled or shared between concurrent callers.

use crate::config::{DomainSettings, MailAccountCredential, TransportSecurity};
use crate::error::{Error, Result};
use crate::store::{ImapStore, MailStore};
use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use rustls::pki_types::ServerName;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info, warn};

/// Opens authenticated store sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and log in. Rejected credentials fail with
    /// [`Error::Authentication`]; anything else that prevents a usable
    /// session fails with [`Error::Connection`].
    async fn connect(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
    ) -> Result<Box<dyn MailStore>>;
}

/// [`Connector`] for IMAP servers over `async-imap`.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    timeout: Duration,
}

impl ImapConnector {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn open(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
    ) -> Result<Box<dyn MailStore>> {
        let addr = format!("{}:{}", domain.imap_host, domain.imap_port);
        debug!("Connecting to IMAP server at {}", addr);

        let tcp_stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| Error::Connection(format!("{addr}: {e}")))?;

        match domain.security {
            TransportSecurity::Plain => {
                let client = async_imap::Client::new(tcp_stream.compat());
                self.login(client, account).await
            }
            TransportSecurity::Implicit => {
                let tls_stream = handshake(domain, tcp_stream).await?;
                let client = async_imap::Client::new(tls_stream.compat());
                self.login(client, account).await
            }
            TransportSecurity::StartTls => {
                let mut client = async_imap::Client::new(tcp_stream.compat());
                client
                    .run_command_and_check_ok("STARTTLS", None)
                    .await
                    .map_err(|e| Error::Connection(format!("STARTTLS failed: {e}")))?;

                let inner = client.into_inner().into_inner();
                let tls_stream = handshake(domain, inner).await?;
                let client = async_imap::Client::new(tls_stream.compat());
                self.login(client, account).await
            }
        }
    }

    async fn login<T>(
        &self,
        client: async_imap::Client<T>,
        account: &MailAccountCredential,
    ) -> Result<Box<dyn MailStore>>
    where
        T: AsyncRead + AsyncWrite + Unpin + Debug + Send + 'static,
    {
        let session = client
            .login(&account.username, &account.secret)
            .await
            .map_err(|(e, _)| match e {
                async_imap::error::Error::No(msg) => {
                    warn!("Login rejected for {}: {}", account.username, msg);
                    Error::Authentication(msg)
                }
                other => Error::Connection(format!("Login failed: {other}")),
            })?;

        info!("Connected to IMAP server as {}", account.username);
        Ok(Box::new(ImapStore::new(session, self.timeout)))
    }
}

#[async_trait]
impl Connector for ImapConnector {
    async fn connect(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
    ) -> Result<Box<dyn MailStore>> {
        tokio::time::timeout(self.timeout, self.open(domain, account))
            .await
            .map_err(|_| {
                Error::Connection(format!(
                    "connecting to {}:{} timed out",
                    domain.imap_host, domain.imap_port
                ))
            })?
    }
}

async fn handshake(
    domain: &DomainSettings,
    stream: TcpStream,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let connector = tls_connector(domain.accept_invalid_certs)?;
    let server_name = ServerName::try_from(domain.imap_host.clone())
        .map_err(|e| Error::Connection(format!("Invalid server name: {e}")))?;

    connector
        .connect(server_name, stream)
        .await
        .map_err(|e| Error::Connection(format!("TLS handshake failed: {e}")))
}

/// Build a TLS connector verifying against the webpki roots, or
/// accepting any certificate for self-signed bridges.
fn tls_connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Connection(format!("TLS setup failed: {e}")))?;

    let config = if accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    } else {
        let roots = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// One authenticated session, owned by exactly one operation.
///
/// Call [`close`](Self::close) when the operation is done. A session
/// dropped without closing (error path, cancelled task) drops the
/// transport, which closes the socket without a LOGOUT.
pub struct Session {
    store: Box<dyn MailStore>,
    account: String,
    timeout: Duration,
    closed: bool,
}

impl Session {
    /// Connect through `connector`, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] or [`Error::Authentication`].
    pub async fn open(
        connector: &dyn Connector,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        timeout: Duration,
    ) -> Result<Self> {
        let store = tokio::time::timeout(timeout, connector.connect(domain, account))
            .await
            .map_err(|_| Error::Connection(format!("connecting to {} timed out", domain.id)))??;
        Ok(Self {
            store,
            account: account.account_id.to_string(),
            timeout,
            closed: false,
        })
    }

    pub fn store(&mut self) -> &mut dyn MailStore {
        self.store.as_mut()
    }

    /// Log out and release the session. Logout failures are logged,
    /// never returned: the operation's outcome is already decided.
    pub async fn close(mut self) {
        match tokio::time::timeout(self.timeout, self.store.logout()).await {
            Ok(Ok(())) => debug!("Session for {} closed", self.account),
            Ok(Err(e)) => debug!("Logout for {} failed: {}", self.account, e),
            Err(_) => debug!("Logout for {} timed out", self.account),
        }
        self.closed = true;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            debug!("Session for {} dropped without logout", self.account);
        }
    }
}

/// Certificate verifier that accepts all certificates, for domains
/// configured with `accept_invalid_certs`.
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
