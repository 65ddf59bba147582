//! Public entry point
//!
//! [`MailEngine`] composes sessions, the listing cache, the fetcher,
//! thread grouping, and the relay. Every remote call opens its own
//! session and closes it before returning.

use crate::cache::{CacheKey, ResultCache};
use crate::config::{DomainSettings, EngineConfig, MailAccountCredential};
use crate::connection::{Connector, ImapConnector, Session};
use crate::error::{Error, FetchError, Result};
use crate::fetcher::{MessageFetcher, ReadMode};
use crate::flag::{Flag, FlagOp};
use crate::folder::{Folder, MailboxStatistics};
use crate::message::Message;
use crate::store::{MailStore, SearchScope};
use crate::thread::{self, Thread};
use crate::transmit::{self, OutgoingMessage, Relay, SmtpRelay};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Email sync and transmission engine.
///
/// Cheap to share behind an [`Arc`]; the cache is the only state kept
/// between calls.
pub struct MailEngine {
    connector: Arc<dyn Connector>,
    relay: Arc<dyn Relay>,
    fetcher: MessageFetcher,
    folders: ResultCache<Vec<Folder>>,
    messages: ResultCache<Vec<Message>>,
    config: EngineConfig,
}

impl MailEngine {
    /// Engine over IMAP and SMTP.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the cache capacity is zero.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let connector = Arc::new(ImapConnector::new(config.operation_timeout));
        let relay = Arc::new(SmtpRelay::new(config.operation_timeout));
        Self::with_backends(config, connector, relay)
    }

    /// Engine over caller-supplied store and relay backends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the cache capacity is zero.
    pub fn with_backends(
        config: EngineConfig,
        connector: Arc<dyn Connector>,
        relay: Arc<dyn Relay>,
    ) -> Result<Self> {
        let capacity = NonZeroUsize::new(config.cache_capacity)
            .ok_or_else(|| Error::Config("cache capacity must be positive".into()))?;
        Ok(Self {
            connector,
            relay,
            fetcher: MessageFetcher::new(config.batch_size),
            folders: ResultCache::new(capacity, config.cache_ttl),
            messages: ResultCache::new(capacity, config.cache_ttl),
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Every selectable folder with its counts, sorted by name.
    ///
    /// A folder whose counts cannot be read is left out and logged.
    ///
    /// # Errors
    ///
    /// Fails on connection or authentication failure.
    pub async fn list_folders(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
    ) -> Result<Vec<Folder>> {
        check_account(domain, account)?;
        let key = CacheKey::folders(&account.account_id, &domain.id);
        self.folders
            .get_or_fetch(key, || async move {
                let mut session = self.open(domain, account).await?;
                let result = read_folders(session.store()).await;
                session.close().await;
                result
            })
            .await
    }

    /// One page of `folder`, newest first, headers only.
    ///
    /// # Errors
    ///
    /// Fails on connection failure or if the folder does not exist.
    pub async fn list_messages(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        folder: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        check_account(domain, account)?;
        let key = CacheKey::messages(&account.account_id, &domain.id, folder, limit, offset);
        self.messages
            .get_or_fetch(key, || async move {
                let mut session = self.open(domain, account).await?;
                let result = self
                    .fetcher
                    .list(session.store(), folder, limit, offset)
                    .await;
                session.close().await;
                Ok(result?.messages)
            })
            .await
    }

    /// Fetch one message in full and mark it read.
    ///
    /// # Errors
    ///
    /// Fails with a [`FetchError`] if the folder or message does not
    /// exist or the message cannot be parsed.
    pub async fn get_message(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        folder: &str,
        id: u32,
    ) -> Result<Message> {
        let result = self
            .fetch_one(domain, account, folder, id, ReadMode::MarkSeen)
            .await;
        self.invalidate(account, domain, &[folder]);
        result
    }

    /// Fetch one message in full, leaving its flags untouched.
    ///
    /// # Errors
    ///
    /// Same as [`get_message`](Self::get_message).
    pub async fn peek_message(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        folder: &str,
        id: u32,
    ) -> Result<Message> {
        self.fetch_one(domain, account, folder, id, ReadMode::Peek)
            .await
    }

    /// Compose and deliver `message` from the account's address.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Send`] on composition, relay authentication,
    /// or delivery failure.
    pub async fn send_message(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        message: &OutgoingMessage,
    ) -> Result<()> {
        check_account(domain, account)?;
        let composed = transmit::compose(&account.email_address, message)?;
        self.relay.deliver(domain, account, &composed).await?;
        Ok(())
    }

    /// Move a message to `to_folder`.
    ///
    /// # Errors
    ///
    /// Fails if the message does not exist or the store refuses the
    /// move.
    pub async fn move_message(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        folder: &str,
        id: u32,
        to_folder: &str,
    ) -> Result<()> {
        let result = self
            .mutate(domain, account, folder, id, Change::Move(to_folder))
            .await;
        self.invalidate(account, domain, &[folder, to_folder]);
        result?;
        info!("Moved message {} from {} to {}", id, folder, to_folder);
        Ok(())
    }

    /// Permanently remove a message.
    ///
    /// # Errors
    ///
    /// Fails if the message does not exist or the store refuses the
    /// change.
    pub async fn delete_message(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        folder: &str,
        id: u32,
    ) -> Result<()> {
        let result = self
            .mutate(domain, account, folder, id, Change::Delete)
            .await;
        self.invalidate(account, domain, &[folder]);
        result?;
        info!("Deleted message {} from {}", id, folder);
        Ok(())
    }

    /// # Errors
    ///
    /// Fails if the message does not exist.
    pub async fn mark_read(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        folder: &str,
        id: u32,
    ) -> Result<()> {
        self.set_seen(domain, account, folder, id, FlagOp::Add).await
    }

    /// # Errors
    ///
    /// Fails if the message does not exist.
    pub async fn mark_unread(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        folder: &str,
        id: u32,
    ) -> Result<()> {
        self.set_seen(domain, account, folder, id, FlagOp::Remove).await
    }

    /// Threads among the newest `limit` messages of `folder`, most
    /// recently active first.
    ///
    /// # Errors
    ///
    /// Same as [`list_messages`](Self::list_messages).
    pub async fn list_threads(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        folder: &str,
        limit: usize,
    ) -> Result<Vec<Thread>> {
        let messages = self.list_messages(domain, account, folder, limit, 0).await?;
        Ok(thread::group(&messages))
    }

    /// The thread with id `thread_id` among the newest `limit` messages.
    ///
    /// # Errors
    ///
    /// Fails with [`FetchError::ThreadNotFound`] if no thread has that
    /// id, or as [`list_messages`](Self::list_messages) does.
    pub async fn get_thread(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        folder: &str,
        thread_id: &str,
        limit: usize,
    ) -> Result<Thread> {
        self.list_threads(domain, account, folder, limit)
            .await?
            .into_iter()
            .find(|t| t.id == thread_id)
            .ok_or_else(|| FetchError::ThreadNotFound(thread_id.to_string()).into())
    }

    /// Messages among the newest `limit` of `folder` whose subject,
    /// sender, or any recipient contains `query`, ignoring case.
    ///
    /// # Errors
    ///
    /// Same as [`list_messages`](Self::list_messages).
    pub async fn search_messages(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        folder: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let needle = query.to_lowercase();
        let messages = self.list_messages(domain, account, folder, limit, 0).await?;
        Ok(messages
            .into_iter()
            .filter(|m| matches_query(m, &needle))
            .collect())
    }

    /// Message and unread totals across every folder.
    ///
    /// # Errors
    ///
    /// Same as [`list_folders`](Self::list_folders).
    pub async fn statistics(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
    ) -> Result<MailboxStatistics> {
        let folders = self.list_folders(domain, account).await?;
        Ok(MailboxStatistics::from_folders(folders))
    }

    async fn open(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
    ) -> Result<Session> {
        Session::open(
            self.connector.as_ref(),
            domain,
            account,
            self.config.operation_timeout,
        )
        .await
    }

    async fn fetch_one(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        folder: &str,
        id: u32,
        mode: ReadMode,
    ) -> Result<Message> {
        check_account(domain, account)?;
        let mut session = self.open(domain, account).await?;
        let result = self.fetcher.get(session.store(), folder, id, mode).await;
        session.close().await;
        result
    }

    async fn set_seen(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        folder: &str,
        id: u32,
        op: FlagOp,
    ) -> Result<()> {
        let result = self
            .mutate(domain, account, folder, id, Change::Seen(op))
            .await;
        self.invalidate(account, domain, &[folder]);
        result?;
        debug!("Updated \\Seen on message {} in {}", id, folder);
        Ok(())
    }

    /// Select `folder`, check that `id` exists, then apply `change`.
    async fn mutate(
        &self,
        domain: &DomainSettings,
        account: &MailAccountCredential,
        folder: &str,
        id: u32,
        change: Change<'_>,
    ) -> Result<()> {
        check_account(domain, account)?;
        let mut session = self.open(domain, account).await?;
        let result = apply(session.store(), folder, id, change).await;
        session.close().await;
        result
    }

    /// Drop the listings of `folders` and the account's folder list.
    ///
    /// Called whatever the mutation returned: a failed call may still
    /// have changed the store.
    fn invalidate(
        &self,
        account: &MailAccountCredential,
        domain: &DomainSettings,
        folders: &[&str],
    ) {
        for folder in folders {
            self.messages
                .invalidate_folder(&account.account_id, &domain.id, folder);
        }
        self.folders
            .invalidate_account(&account.account_id, &domain.id);
    }
}

/// A single-message change applied by [`MailEngine::mutate`].
#[derive(Debug, Clone, Copy)]
enum Change<'a> {
    Move(&'a str),
    Delete,
    Seen(FlagOp),
}

async fn apply(store: &mut dyn MailStore, folder: &str, id: u32, change: Change<'_>) -> Result<()> {
    store.select(folder).await?;
    if !store.search(SearchScope::All).await?.contains(&id) {
        return Err(FetchError::MessageNotFound {
            folder: folder.to_string(),
            uid: id,
        }
        .into());
    }
    match change {
        Change::Move(to) => store.move_to(&[id], to).await,
        Change::Delete => {
            store.store_flag(&[id], FlagOp::Add, &Flag::Deleted).await?;
            store.expunge_uids(&[id]).await
        }
        Change::Seen(op) => store.store_flag(&[id], op, &Flag::Seen).await,
    }
}

fn check_account(domain: &DomainSettings, account: &MailAccountCredential) -> Result<()> {
    if account.domain_id == domain.id {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "account {} belongs to domain {}, not {}",
            account.account_id, account.domain_id, domain.id
        )))
    }
}

async fn read_folders(store: &mut dyn MailStore) -> Result<Vec<Folder>> {
    let mut folders = Vec::new();
    for name in store.list_folders().await? {
        match store.status(&name).await {
            Ok(status) => folders.push(Folder::new(name, status.messages, status.unseen)),
            Err(e) if e.is_connection() => return Err(e),
            Err(e) => warn!("Skipping folder {}: {}", name, e),
        }
    }
    folders.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(folders)
}

fn matches_query(message: &Message, needle: &str) -> bool {
    let hit = |s: &str| s.to_lowercase().contains(needle);
    hit(&message.subject)
        || std::iter::once(&message.sender)
            .chain(&message.recipients)
            .any(|a| hit(&a.email) || a.name.as_deref().is_some_and(hit))
}
