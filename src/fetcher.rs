//! Bounded message listing and detail fetches

use crate::error::{FetchError, Result};
use crate::flag::{Flag, FlagOp};
use crate::message::Message;
use crate::store::{FetchedItem, MailStore, SearchScope};
use std::collections::HashMap;
use std::ops::Range;
use tracing::{debug, info, warn};

/// Whether a detail fetch marks the message read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    MarkSeen,
    Peek,
}

/// One page of a folder listing.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Newest first.
    pub messages: Vec<Message>,
    /// UIDs in the page that could not be turned into messages.
    pub skipped: Vec<u32>,
}

/// Positions `[total-offset-limit, total-offset)` of an ascending
/// sequence, clipped to `[0, total)`. Offset counts from the newest.
#[must_use]
pub const fn window(total: usize, limit: usize, offset: usize) -> Range<usize> {
    let end = total.saturating_sub(offset);
    let start = end.saturating_sub(limit);
    start..end
}

#[derive(Debug, Clone)]
pub struct MessageFetcher {
    batch_size: usize,
}

impl MessageFetcher {
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// List one page of `folder`, newest first.
    ///
    /// Headers are fetched in serial batches. An item that cannot be
    /// parsed is logged and recorded in [`Listing::skipped`].
    ///
    /// # Errors
    ///
    /// Fails if the folder does not exist or a whole batch fails.
    pub async fn list(
        &self,
        store: &mut dyn MailStore,
        folder: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Listing> {
        store.select(folder).await?;
        let uids = store.search(SearchScope::All).await?;
        let wanted: Vec<u32> = uids[window(uids.len(), limit, offset)]
            .iter()
            .rev()
            .copied()
            .collect();

        debug!(
            "Listing {} of {} messages in {} (offset {})",
            wanted.len(),
            uids.len(),
            folder,
            offset
        );

        let mut parsed: HashMap<u32, Message> = HashMap::with_capacity(wanted.len());
        for batch in wanted.chunks(self.batch_size) {
            for item in store.fetch_headers(batch).await? {
                match item {
                    FetchedItem::Parsed(raw) if batch.contains(&raw.uid) => {
                        match Message::from_header_block(raw.uid, folder, &raw.flags, &raw.data) {
                            Ok(message) => {
                                parsed.insert(raw.uid, message);
                            }
                            Err(e) => warn!("Skipping message in {}: {}", folder, e),
                        }
                    }
                    FetchedItem::Parsed(raw) => {
                        debug!("Ignoring unrequested item {} in {}", raw.uid, folder);
                    }
                    FetchedItem::Malformed(e) => warn!("Skipping message in {}: {}", folder, e),
                }
            }
        }

        let mut listing = Listing::default();
        for uid in wanted {
            match parsed.remove(&uid) {
                Some(message) => listing.messages.push(message),
                None => listing.skipped.push(uid),
            }
        }
        if !listing.skipped.is_empty() {
            warn!(
                "Listed {} messages in {}, skipped {:?}",
                listing.messages.len(),
                folder,
                listing.skipped
            );
        }
        Ok(listing)
    }

    /// Fetch one message in full.
    ///
    /// With [`ReadMode::MarkSeen`] an unread message is flagged
    /// `\Seen` on the store and returned as read.
    ///
    /// # Errors
    ///
    /// Fails with [`FetchError::FolderNotFound`],
    /// [`FetchError::MessageNotFound`], or [`FetchError::Malformed`].
    pub async fn get(
        &self,
        store: &mut dyn MailStore,
        folder: &str,
        uid: u32,
        mode: ReadMode,
    ) -> Result<Message> {
        store.select(folder).await?;

        let raw = match store.fetch_message(uid).await? {
            Some(FetchedItem::Parsed(raw)) => raw,
            Some(FetchedItem::Malformed(e)) => {
                return Err(FetchError::Malformed(e.to_string()).into());
            }
            None => {
                return Err(FetchError::MessageNotFound {
                    folder: folder.to_string(),
                    uid,
                }
                .into());
            }
        };

        let mut message = Message::from_raw(uid, folder, &raw.flags, &raw.data)?;
        if mode == ReadMode::MarkSeen && !message.is_read {
            store.store_flag(&[uid], FlagOp::Add, &Flag::Seen).await?;
            message.is_read = true;
            info!("Marked message {} in {} as read", uid, folder);
        }
        Ok(message)
    }
}
