//! Conversation grouping
//!
//! Messages are connected through their Message-ID, In-Reply-To, and
//! References headers; each connected component is one thread. Ids
//! referenced but absent from the input still join components, so two
//! replies to a message outside the page share a thread.

use crate::message::{Address, Message};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    /// Message-ID of the earliest member.
    pub id: String,
    /// Subject of the earliest member.
    pub subject: String,
    /// Oldest first.
    pub messages: Vec<Message>,
    /// Senders and recipients of every member, one entry per address.
    pub participants: Vec<Address>,
    pub has_unread: bool,
    pub latest_date: DateTime<Utc>,
    pub message_count: usize,
}

/// Group `messages` into threads, most recently active first.
///
/// The result depends only on the set of messages, never on their
/// order in `messages`.
#[must_use]
pub fn group(messages: &[Message]) -> Vec<Thread> {
    let mut ids = NodeIds::default();
    let mut sets = DisjointSet::default();

    for message in messages {
        let node = ids.node(&message.message_id, &mut sets);
        for reference in message.in_reply_to.iter().chain(&message.references) {
            let other = ids.node(reference, &mut sets);
            sets.union(node, other);
        }
    }

    let mut components: HashMap<usize, Vec<&Message>> = HashMap::new();
    for message in messages {
        let root = sets.find(ids.index[message.message_id.as_str()]);
        components.entry(root).or_default().push(message);
    }

    let mut threads: Vec<Thread> = components.into_values().map(build).collect();
    threads.sort_by(|a, b| {
        b.latest_date
            .cmp(&a.latest_date)
            .then_with(|| a.id.cmp(&b.id))
    });
    threads
}

fn build(mut members: Vec<&Message>) -> Thread {
    members.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.message_id.cmp(&b.message_id))
            .then_with(|| a.id.cmp(&b.id))
            .then_with(|| a.folder.cmp(&b.folder))
    });

    let mut seen = HashSet::new();
    let participants = members
        .iter()
        .flat_map(|m| std::iter::once(&m.sender).chain(&m.recipients))
        .filter(|addr| !addr.email.is_empty() && seen.insert(addr.email.to_lowercase()))
        .cloned()
        .collect();

    let first = members[0];
    Thread {
        id: first.message_id.clone(),
        subject: first.subject.clone(),
        participants,
        has_unread: members.iter().any(|m| !m.is_read),
        latest_date: members.iter().map(|m| m.date).max().unwrap_or(first.date),
        message_count: members.len(),
        messages: members.into_iter().cloned().collect(),
    }
}

#[derive(Default)]
struct NodeIds<'a> {
    index: HashMap<&'a str, usize>,
}

impl<'a> NodeIds<'a> {
    fn node(&mut self, id: &'a str, sets: &mut DisjointSet) -> usize {
        *self.index.entry(id).or_insert_with(|| sets.add())
    }
}

/// Union-find with path halving and union by rank.
#[derive(Default)]
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn add(&mut self) -> usize {
        self.parent.push(self.parent.len());
        self.rank.push(0);
        self.parent.len() - 1
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        match self.rank[a].cmp(&self.rank[b]) {
            std::cmp::Ordering::Less => self.parent[a] = b,
            std::cmp::Ordering::Greater => self.parent[b] = a,
            std::cmp::Ordering::Equal => {
                self.parent[b] = a;
                self.rank[a] += 1;
            }
        }
    }
}
