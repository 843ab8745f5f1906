//! Lazy, restartable journal queries.

use crate::journal::VolumeJournal;
use nullfs_protocol::{EntryId, JournalEntry};

/// Filters for [`VolumeJournal::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Only entries strictly after this position.
    pub since: EntryId,
    /// Only entries created by this origin.
    pub origin: Option<String>,
    /// Stop at the first pending entry instead of returning it.
    pub committed_only: bool,
    /// Maximum number of entries returned.
    pub limit: Option<usize>,
}

impl QueryOptions {
    /// Every entry, pending included.
    pub fn all() -> Self {
        Self::default()
    }

    /// Starts after `since`.
    #[must_use]
    pub fn since(mut self, since: EntryId) -> Self {
        self.since = since;
        self
    }

    /// Restricts to one origin.
    #[must_use]
    pub fn from_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Stops at the first pending entry.
    #[must_use]
    pub fn committed_only(mut self) -> Self {
        self.committed_only = true;
        self
    }

    /// Caps the number of entries returned.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Iterator over journal entries in position order.
///
/// The range is fixed when the query starts: entries appended afterwards
/// are not returned. Each step takes the index lock only briefly, so a
/// long-running query never blocks writers.
pub struct JournalQuery<'a> {
    journal: &'a VolumeJournal,
    options: QueryOptions,
    position: EntryId,
    end: EntryId,
    returned: usize,
    stopped: bool,
}

impl<'a> JournalQuery<'a> {
    pub(crate) fn new(journal: &'a VolumeJournal, options: QueryOptions, end: EntryId) -> Self {
        Self {
            journal,
            position: options.since,
            options,
            end,
            returned: 0,
            stopped: false,
        }
    }

    /// Last position consumed. Pass it as `since` to resume.
    pub fn position(&self) -> EntryId {
        self.position
    }

    /// Returns true if the query stopped at a pending entry.
    pub fn blocked_on_pending(&self) -> bool {
        let journal = self.journal;
        let index = journal.index.read();
        self.options.committed_only
            && self.position.next() < self.end
            && index
                .entries
                .range(self.position.next()..self.end)
                .next()
                .is_some_and(|(_, entry)| !entry.is_committed())
    }
}

impl Iterator for JournalQuery<'_> {
    type Item = (EntryId, JournalEntry);

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped || self.options.limit.is_some_and(|limit| self.returned >= limit) {
            return None;
        }
        if self.position.next() >= self.end {
            self.stopped = true;
            return None;
        }

        let journal = self.journal;
        let index = journal.index.read();
        for (id, entry) in index.entries.range(self.position.next()..self.end) {
            if self.options.committed_only && !entry.is_committed() {
                self.stopped = true;
                return None;
            }
            self.position = *id;
            if let Some(origin) = &self.options.origin {
                if entry.origin_node != *origin {
                    continue;
                }
            }
            self.returned += 1;
            return Some((*id, entry.clone()));
        }

        self.position = EntryId::new(self.end.as_u64() - 1);
        self.stopped = true;
        None
    }
}
