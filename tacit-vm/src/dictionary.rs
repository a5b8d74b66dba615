//! Append-only name -> tagged-value dictionary (spec.md section 4.4),
//! implemented as "a contiguous `Vec<Entry>`" exactly as spec.md section
//! 9's redesign note prescribes in place of the source's linked list:
//! `mark`/`forget` become a length snapshot and a truncate.

use tacit_types::error::VmResult;
use tacit_types::value::{Decoded, TaggedValue};

/// One dictionary entry. `name` is a STRING-digest address, not the text
/// itself, so entries are cheap to carry around and compare.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    pub name: u16,
    pub payload: TaggedValue,
    pub hidden: bool,
}

impl Entry {
    /// The immediate bit is carried as `meta` on the payload (spec.md
    /// section 4.4).
    pub fn is_immediate(&self) -> bool {
        matches!(self.payload.untag(), Decoded::Tagged { meta: true, .. })
    }
}

/// Opaque checkpoint returned by [`Dictionary::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mark(usize);

#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: Vec<Entry>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend conceptually, implemented as append-then-search-from-the-
    /// end: the most recently defined name is found first.
    pub fn define(&mut self, name: u16, payload: TaggedValue) -> Mark {
        self.entries.push(Entry { name, payload, hidden: false });
        Mark(self.entries.len() - 1)
    }

    /// Linear scan from the most recent entry backward, skipping hidden
    /// entries. Returns `None` (spec.md: caller maps this to `NIL`).
    pub fn lookup(&self, name: u16) -> Option<TaggedValue> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.name == name && !e.hidden)
            .map(|e| e.payload)
    }

    /// Like [`Dictionary::lookup`] but also reports whether the match is
    /// marked immediate, for the parser's compile loop.
    pub fn lookup_entry(&self, name: u16) -> Option<(Mark, Entry)> {
        self.entries
            .iter()
            .enumerate()
            .rev()
            .find(|(_, e)| e.name == name && !e.hidden)
            .map(|(i, e)| (Mark(i), *e))
    }

    pub fn mark(&self) -> Mark {
        Mark(self.entries.len())
    }

    /// Rewind the dictionary to a prior checkpoint, discarding every
    /// entry defined since (spec.md: used to drop locals at the end of
    /// a definition).
    pub fn forget(&mut self, mark: Mark) {
        self.entries.truncate(mark.0);
    }

    pub fn head(&self) -> Option<Mark> {
        if self.entries.is_empty() {
            None
        } else {
            Some(Mark(self.entries.len() - 1))
        }
    }

    pub fn hide_head(&mut self) {
        if let Some(last) = self.entries.last_mut() {
            last.hidden = true;
        }
    }

    pub fn unhide_head(&mut self) {
        if let Some(last) = self.entries.last_mut() {
            last.hidden = false;
        }
    }

    /// Flip the most recently defined entry's immediate bit (Forth's
    /// trailing `immediate` marker word, invoked right after `: name ... ;`).
    pub fn mark_head_immediate(&mut self) {
        if let Some(last) = self.entries.last_mut() {
            last.payload = last.payload.with_meta(true);
        }
    }

    pub fn entry_info(&self, mark: Mark) -> VmResult<Entry> {
        self.entries
            .get(mark.0)
            .copied()
            .ok_or_else(|| tacit_types::error::VmError::Invariant {
                detail: "dictionary mark out of range".into(),
            })
    }

    pub fn update_payload(&mut self, mark: Mark, payload: TaggedValue) {
        if let Some(e) = self.entries.get_mut(mark.0) {
            e.payload = payload;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tacit_types::value::Tag;

    #[test]
    fn checkpoint_forget_removes_only_new_names() {
        let mut dict = Dictionary::new();
        dict.define(1, TaggedValue::tagged(Tag::Code, false, 0));
        let mark = dict.mark();
        dict.define(2, TaggedValue::tagged(Tag::Code, false, 1));
        dict.define(3, TaggedValue::tagged(Tag::Code, false, 2));
        assert!(dict.lookup(2).is_some());
        assert!(dict.lookup(3).is_some());
        dict.forget(mark);
        assert!(dict.lookup(2).is_none());
        assert!(dict.lookup(3).is_none());
        assert!(dict.lookup(1).is_some());
    }

    #[test]
    fn hidden_head_is_not_found_until_unhidden() {
        let mut dict = Dictionary::new();
        dict.define(5, TaggedValue::tagged(Tag::Code, false, 0));
        dict.hide_head();
        assert!(dict.lookup(5).is_none());
        dict.unhide_head();
        assert!(dict.lookup(5).is_some());
    }

    #[test]
    fn most_recent_definition_shadows_earlier_ones() {
        let mut dict = Dictionary::new();
        dict.define(7, TaggedValue::tagged(Tag::Code, false, 1));
        dict.define(7, TaggedValue::tagged(Tag::Code, false, 2));
        let Decoded::Tagged { value, .. } = dict.lookup(7).unwrap().untag() else {
            panic!()
        };
        assert_eq!(value, 2);
    }

    #[test]
    fn immediate_bit_is_carried_as_meta() {
        let mut dict = Dictionary::new();
        dict.define(9, TaggedValue::tagged(Tag::Code, true, 0));
        let (_, entry) = dict.lookup_entry(9).unwrap();
        assert!(entry.is_immediate());
    }
}
