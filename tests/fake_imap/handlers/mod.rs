//! IMAP command handlers for the fake server, one module per command.

mod expunge;
mod login;
mod uid_copy;
mod uid_fetch;

pub use capability::handle_capability;
pub use expunge::handle_expunge;
pub use list::handle_list;
pub use login::handle_login;
pub use logout::handle_logout;
pub use select::handle_select;
pub use uid_copy::handle_uid_copy;
pub use uid_fetch::handle_uid_fetch;
pub use uid_search::handle_uid_search;
pub use uid_store::{StoreArgs, handle_uid_store};

use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};

/// UIDs named by a sequence set. `*` stands for `max_uid`.
fn extract_uids(seq_set: &SequenceSet, max_uid: u32) -> Vec<u32> {
    let value = |s: &SeqOrUid| match s {
        SeqOrUid::Value(v) => v.get(),
        SeqOrUid::Asterisk => max_uid,
    };
    let mut uids = Vec::new();
    for seq in seq_set.0.as_ref() {
        match seq {
            Sequence::Single(s) => uids.push(value(s)),
            Sequence::Range(a, b) => {
                let (lo, hi) = (value(a).min(value(b)), value(a).max(value(b)));
                uids.extend(lo..=hi);
            }
        }
    }
    uids
}

#[cfg(test)]
pub mod testing {
    use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};
    use std::num::NonZeroU32;

    pub fn uid_set(uids: &[u32]) -> SequenceSet {
        SequenceSet(
            uids.iter()
                .map(|u| Sequence::Single(SeqOrUid::Value(NonZeroU32::new(*u).unwrap())))
                .collect::<Vec<_>>()
                .try_into()
                .unwrap(),
        )
    }

    pub fn raw(subject: &str) -> String {
        format!("From: a@b.com\r\nSubject: {subject}\r\n\r\nBody")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    #[test]
    fn ranges_and_asterisk() {
        let set = SequenceSet(
            vec![
                Sequence::Single(SeqOrUid::Value(NonZeroU32::new(2).unwrap())),
                Sequence::Range(SeqOrUid::Value(NonZeroU32::new(5).unwrap()), SeqOrUid::Asterisk),
            ]
            .try_into()
            .unwrap(),
        );
        assert_eq!(extract_uids(&set, 7), vec![2, 5, 6, 7]);
    }
}
