//! Crash and reopen behaviour of the journal on disk.

use bytes::Bytes;
use nullfs_journal::{JournalOptions, QueryOptions, VolumeJournal};
use nullfs_protocol::{ApplyState, Content, EntryId, JournalEntry, Operation, VersionStamp};
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::tempdir;

fn fetched(path: &str, origin: &str, counter: u64, data: &'static [u8]) -> JournalEntry {
    JournalEntry::new(
        "docs",
        path,
        Operation::Update,
        Content::Inline(Bytes::from_static(data)),
        VersionStamp::new(origin, counter),
    )
    .with_state(ApplyState::Committed)
}

#[test]
fn pending_entry_survives_crash_before_apply() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.log");

    {
        let journal = VolumeJournal::open(&path, "docs", "NodeB", JournalOptions::default())
            .unwrap();
        journal
            .append_remote(vec![fetched("a.txt", "NodeA", 7, b"from A")])
            .unwrap();
        // Process dies before the entry is applied.
    }

    let journal =
        VolumeJournal::open(&path, "docs", "NodeB", JournalOptions::default()).unwrap();
    let pending = journal.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].1.stamp(), VersionStamp::new("NodeA", 7));
    assert_eq!(pending[0].1.apply_state, ApplyState::Pending);

    // Re-fetching the same entry after restart does not duplicate it.
    let again = journal
        .append_remote(vec![fetched("a.txt", "NodeA", 7, b"from A")])
        .unwrap();
    assert_eq!(again.appended, 0);
    assert_eq!(again.ids, vec![pending[0].0]);

    journal.mark_committed(&again.ids).unwrap();
    assert!(journal.pending().is_empty());
    assert_eq!(
        journal.winner("a.txt").unwrap().stamp,
        VersionStamp::new("NodeA", 7)
    );
}

#[test]
fn preallocated_zero_tail_is_ignored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.log");

    {
        let journal = VolumeJournal::open(&path, "docs", "n", JournalOptions::default())
            .unwrap();
        journal
            .append_local("a", Operation::Create, Content::Inline(Bytes::from_static(b"a")))
            .unwrap();
    }
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0u8; 4096]).unwrap();
    drop(file);

    let journal = VolumeJournal::open(&path, "docs", "n", JournalOptions::default()).unwrap();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal.discarded_tail_bytes(), 4096);
}

#[test]
fn damage_before_tail_refuses_to_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.log");

    {
        let journal = VolumeJournal::open(&path, "docs", "n", JournalOptions::default())
            .unwrap();
        for name in ["a", "b", "c"] {
            journal
                .append_local(name, Operation::Create, Content::Inline(Bytes::from_static(b"x")))
                .unwrap();
        }
    }

    let pristine = std::fs::read(&path).unwrap();

    // A payload byte of the first record.
    let mut bytes = pristine.clone();
    bytes[20] ^= 0xFF;
    std::fs::write(&path, bytes).unwrap();
    let err = VolumeJournal::open(&path, "docs", "n", JournalOptions::default()).unwrap_err();
    assert!(err.to_string().contains("corruption"));

    // The high byte of the first record's length field.
    let mut bytes = pristine.clone();
    bytes[10] = 0x7f;
    std::fs::write(&path, bytes).unwrap();
    let err = VolumeJournal::open(&path, "docs", "n", JournalOptions::default()).unwrap_err();
    assert!(err.to_string().contains("corruption"));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), pristine.len() as u64);
}

#[test]
fn positions_and_counters_continue_after_compaction_and_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.log");

    {
        let journal = VolumeJournal::open(&path, "docs", "n", JournalOptions::default())
            .unwrap();
        for round in 0..10u8 {
            journal
                .append_local(
                    "counter.txt",
                    Operation::Update,
                    Content::Inline(Bytes::from(vec![round])),
                )
                .unwrap();
        }
        let stats = journal.compact(EntryId::new(10)).unwrap();
        assert_eq!(stats.kept, 1);
        assert_eq!(stats.dropped, 9);
    }

    let journal = VolumeJournal::open(&path, "docs", "n", JournalOptions::default()).unwrap();
    assert_eq!(journal.len(), 1);
    let (id, entry) = journal
        .append_local("other.txt", Operation::Create, Content::Inline(Bytes::from_static(b"o")))
        .unwrap();
    assert_eq!(id, EntryId::new(11));
    assert_eq!(entry.counter, 11);

    let served: Vec<_> = journal
        .query(QueryOptions::all().committed_only().since(EntryId::new(5)))
        .map(|(id, _)| id.as_u64())
        .collect();
    assert_eq!(served, vec![10, 11]);
}
