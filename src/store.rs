//! Mailbox store operations over one authenticated session
//!
//! [`MailStore`] is the seam between the engine and the wire: the
//! production [`ImapStore`] drives an `async-imap` session, tests use
//! an in-memory store. Fetch responses are turned into
//! [`FetchedItem`]s here, so a malformed item is data rather than an
//! error.

use crate::error::{Error, FetchError, PartialItemError, Result};
use crate::flag::{Flag, FlagOp};
use async_imap::types::{Fetch, Name, NameAttribute};
use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use futures::{StreamExt, TryStreamExt};
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Headers and flags only; never sets `\Seen`.
const HEADER_QUERY: &str = "(UID FLAGS BODY.PEEK[HEADER])";

/// Full raw message and flags; never sets `\Seen`.
const MESSAGE_QUERY: &str = "(UID FLAGS BODY.PEEK[])";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    All,
    Unseen,
    Deleted,
}

impl SearchScope {
    const fn as_query(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Unseen => "UNSEEN",
            Self::Deleted => "DELETED",
        }
    }
}

/// Message and unread counts of one folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderStatus {
    pub messages: u32,
    pub unseen: u32,
}

/// One message section as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub uid: u32,
    pub flags: Vec<Flag>,
    pub data: Vec<u8>,
}

/// A single entry of a fetch response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchedItem {
    Parsed(RawItem),
    Malformed(PartialItemError),
}

impl FetchedItem {
    #[must_use]
    pub const fn uid(&self) -> Option<u32> {
        match self {
            Self::Parsed(item) => Some(item.uid),
            Self::Malformed(err) => err.uid,
        }
    }

    fn from_fetch(fetch: &Fetch, full: bool) -> Self {
        let Some(uid) = fetch.uid else {
            return Self::Malformed(PartialItemError {
                uid: None,
                reason: format!("response for sequence {} carries no UID", fetch.message),
            });
        };

        let data = if full { fetch.body() } else { fetch.header() };
        data.map_or_else(
            || {
                Self::Malformed(PartialItemError {
                    uid: Some(uid),
                    reason: "response carries no message section".into(),
                })
            },
            |data| {
                Self::Parsed(RawItem {
                    uid,
                    flags: fetch.flags().map(|f| Flag::from(&f)).collect(),
                    data: data.to_vec(),
                })
            },
        )
    }
}

/// Typed operations on one exclusively-owned store session.
///
/// Every method except [`list_folders`](Self::list_folders) and
/// [`select`](Self::select) acts on the currently selected folder.
#[async_trait]
pub trait MailStore: Send {
    /// Names of every selectable folder.
    async fn list_folders(&mut self) -> Result<Vec<String>>;

    /// Select `folder` read-write and return its message count.
    async fn select(&mut self, folder: &str) -> Result<u32>;

    /// UIDs matching `scope`, sorted ascending.
    async fn search(&mut self, scope: SearchScope) -> Result<Vec<u32>>;

    /// Header blocks and flags for `uids`, in response order.
    async fn fetch_headers(&mut self, uids: &[u32]) -> Result<Vec<FetchedItem>>;

    /// The full raw message, or `None` if the UID does not exist.
    async fn fetch_message(&mut self, uid: u32) -> Result<Option<FetchedItem>>;

    async fn store_flag(&mut self, uids: &[u32], op: FlagOp, flag: &Flag) -> Result<()>;

    async fn copy(&mut self, uids: &[u32], to: &str) -> Result<()>;

    /// Remove every `\Deleted` message of the selected folder.
    async fn expunge(&mut self) -> Result<()>;

    /// Remove `uids`, already flagged `\Deleted`. Other messages
    /// flagged `\Deleted` in the folder are kept.
    async fn expunge_uids(&mut self, uids: &[u32]) -> Result<()>;

    async fn logout(&mut self) -> Result<()>;

    /// Move messages to another folder. Stores without a native move
    /// copy, flag `\Deleted`, and expunge the moved UIDs.
    async fn move_to(&mut self, uids: &[u32], to: &str) -> Result<()> {
        self.copy(uids, to).await?;
        self.store_flag(uids, FlagOp::Add, &Flag::Deleted).await?;
        self.expunge_uids(uids).await
    }

    async fn status(&mut self, folder: &str) -> Result<FolderStatus> {
        let messages = self.select(folder).await?;
        let unseen = self.search(SearchScope::Unseen).await?.len();
        Ok(FolderStatus {
            messages,
            unseen: u32::try_from(unseen).unwrap_or(u32::MAX),
        })
    }
}

/// Expunge only `uids` on a store without `UID EXPUNGE`.
///
/// Other `\Deleted` messages are unflagged for the duration of the
/// EXPUNGE and flagged again afterwards, even if the EXPUNGE failed.
pub(crate) async fn expunge_shielded<S>(store: &mut S, uids: &[u32]) -> Result<()>
where
    S: MailStore + ?Sized,
{
    let bystanders: Vec<u32> = store
        .search(SearchScope::Deleted)
        .await?
        .into_iter()
        .filter(|uid| !uids.contains(uid))
        .collect();
    if bystanders.is_empty() {
        return store.expunge().await;
    }

    debug!("Shielding {} other deleted messages from EXPUNGE", bystanders.len());
    store
        .store_flag(&bystanders, FlagOp::Remove, &Flag::Deleted)
        .await?;
    let result = store.expunge().await;
    store
        .store_flag(&bystanders, FlagOp::Add, &Flag::Deleted)
        .await?;
    result
}

/// [`MailStore`] over a logged-in `async-imap` session.
pub struct ImapStore<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug + Send,
{
    session: async_imap::Session<T>,
    timeout: Duration,
}

impl<T> ImapStore<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug + Send,
{
    pub const fn new(session: async_imap::Session<T>, timeout: Duration) -> Self {
        Self { session, timeout }
    }

    async fn fetch(&mut self, uid_set: &str, full: bool) -> Result<Vec<FetchedItem>> {
        let query = if full { MESSAGE_QUERY } else { HEADER_QUERY };
        let session = &mut self.session;
        let responses = bounded(self.timeout, "fetch", async move {
            let mut stream = session.uid_fetch(uid_set, query).await?;
            let mut responses = Vec::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(fetch) => responses.push(FetchedItem::from_fetch(&fetch, full)),
                    Err(async_imap::error::Error::Parse(e)) => {
                        responses.push(FetchedItem::Malformed(PartialItemError {
                            uid: None,
                            reason: format!("unparseable response: {e}"),
                        }));
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(responses)
        })
        .await?;
        Ok(responses)
    }

    async fn has_capability(&mut self, name: &str) -> Result<bool> {
        let session = &mut self.session;
        let caps = bounded(self.timeout, "capability", session.capabilities()).await?;
        Ok(caps.has_str(name))
    }
}

#[async_trait]
impl<T> MailStore for ImapStore<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug + Send,
{
    async fn list_folders(&mut self) -> Result<Vec<String>> {
        let session = &mut self.session;
        let names = bounded(self.timeout, "list", async move {
            session
                .list(Some(""), Some("*"))
                .await?
                .try_collect::<Vec<Name>>()
                .await
        })
        .await?;

        Ok(names
            .iter()
            .filter(|name| {
                !name
                    .attributes()
                    .iter()
                    .any(|a| matches!(a, NameAttribute::NoSelect))
            })
            .map(|name| name.name().to_string())
            .collect())
    }

    async fn select(&mut self, folder: &str) -> Result<u32> {
        let result = tokio::time::timeout(self.timeout, self.session.select(folder)).await?;
        match result {
            Ok(mailbox) => Ok(mailbox.exists),
            Err(async_imap::error::Error::No(msg)) => {
                debug!("SELECT {} refused: {}", folder, msg);
                Err(FetchError::FolderNotFound(folder.to_string()).into())
            }
            Err(e) => Err(imap_error("select", e)),
        }
    }

    async fn search(&mut self, scope: SearchScope) -> Result<Vec<u32>> {
        let session = &mut self.session;
        let uids = bounded(self.timeout, "search", session.uid_search(scope.as_query())).await?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch_headers(&mut self, uids: &[u32]) -> Result<Vec<FetchedItem>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch(&uid_set(uids), false).await
    }

    async fn fetch_message(&mut self, uid: u32) -> Result<Option<FetchedItem>> {
        let items = self.fetch(&uid.to_string(), true).await?;
        Ok(pick(items, uid))
    }

    async fn store_flag(&mut self, uids: &[u32], op: FlagOp, flag: &Flag) -> Result<()> {
        let set = uid_set(uids);
        let query = op.store_query(flag);
        let session = &mut self.session;
        bounded(self.timeout, "store", async move {
            session
                .uid_store(&set, &query)
                .await?
                .try_collect::<Vec<Fetch>>()
                .await
        })
        .await?;
        Ok(())
    }

    async fn copy(&mut self, uids: &[u32], to: &str) -> Result<()> {
        let set = uid_set(uids);
        let session = &mut self.session;
        bounded(self.timeout, "copy", session.uid_copy(&set, to)).await
    }

    async fn expunge(&mut self) -> Result<()> {
        let session = &mut self.session;
        bounded(self.timeout, "expunge", async move {
            session.expunge().await?.try_collect::<Vec<u32>>().await
        })
        .await?;
        Ok(())
    }

    async fn expunge_uids(&mut self, uids: &[u32]) -> Result<()> {
        if !self.has_capability("UIDPLUS").await? {
            return expunge_shielded(self, uids).await;
        }
        let set = uid_set(uids);
        let session = &mut self.session;
        bounded(self.timeout, "uid expunge", async move {
            session.uid_expunge(&set).await?.try_collect::<Vec<u32>>().await
        })
        .await?;
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        let session = &mut self.session;
        bounded(self.timeout, "logout", session.logout()).await
    }

    async fn move_to(&mut self, uids: &[u32], to: &str) -> Result<()> {
        if self.has_capability("MOVE").await? {
            let set = uid_set(uids);
            let session = &mut self.session;
            return bounded(self.timeout, "move", session.uid_mv(&set, to)).await;
        }
        self.copy(uids, to).await?;
        self.store_flag(uids, FlagOp::Add, &Flag::Deleted).await?;
        self.expunge_uids(uids).await
    }
}

/// The response item for `uid`. Servers may interleave unsolicited
/// FETCHes for other messages, so an item without a UID only stands
/// for `uid` when nothing carries `uid` itself.
fn pick(items: Vec<FetchedItem>, uid: u32) -> Option<FetchedItem> {
    let mut anonymous = None;
    for item in items {
        match item.uid() {
            Some(u) if u == uid => return Some(item),
            None if anonymous.is_none() => anonymous = Some(item),
            _ => {}
        }
    }
    anonymous
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Run one IMAP command under the operation timeout.
async fn bounded<F, T>(timeout: Duration, command: &str, fut: F) -> Result<T>
where
    F: Future<Output = async_imap::error::Result<T>> + Send,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(|e| imap_error(command, e)),
        Err(_) => {
            warn!("IMAP {} timed out after {:?}", command, timeout);
            Err(Error::Connection(format!("{command} timed out")))
        }
    }
}

fn imap_error(command: &str, e: async_imap::error::Error) -> Error {
    use async_imap::error::Error as Imap;
    match e {
        Imap::No(msg) | Imap::Bad(msg) => FetchError::Protocol(format!("{command}: {msg}")).into(),
        Imap::Io(io) => Error::Connection(format!("{command}: {io}")),
        Imap::ConnectionLost => Error::Connection(format!("{command}: connection lost")),
        other => FetchError::Malformed(format!("{command}: {other}")).into(),
    }
}
