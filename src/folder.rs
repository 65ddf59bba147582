//! Folder listing types

use serde::{Deserialize, Serialize};

/// A mailbox folder as seen at listing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// The store's folder name, used to address the folder.
    pub name: String,
    pub display_name: String,
    pub message_count: u32,
    pub unread_count: u32,
}

impl Folder {
    #[must_use]
    pub fn new(name: impl Into<String>, message_count: u32, unread_count: u32) -> Self {
        let name = name.into();
        Self {
            display_name: display_name(&name),
            name,
            message_count,
            unread_count,
        }
    }
}

/// Human-readable label for a folder name.
///
/// Underscores become spaces and each word is title-cased, so
/// `"SENT_items"` reads as `"Sent Items"`. Hierarchy separators are
/// left alone.
#[must_use]
pub fn display_name(name: &str) -> String {
    name.replace('_', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Mailbox-wide counters across every folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxStatistics {
    pub total_messages: u64,
    pub total_unread: u64,
    pub folders: Vec<Folder>,
}

impl MailboxStatistics {
    #[must_use]
    pub fn from_folders(folders: Vec<Folder>) -> Self {
        Self {
            total_messages: folders.iter().map(|f| u64::from(f.message_count)).sum(),
            total_unread: folders.iter().map(|f| u64::from(f.unread_count)).sum(),
            folders,
        }
    }
}
