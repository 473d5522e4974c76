use std::sync::Mutex;

use super::protos::*;

/// A reader/writer for the raft log. `ConsensusModule` only ever appends at
/// `last_index() + 1` and only ever reads entries at or after `first_index()`; it
/// never seeks backwards past a point once `discard_before` has moved `first_index`
/// forward, mirroring the Raft paper's log-compaction boundary.
pub trait LogStorage: Send + Sync {
	fn first_index(&self) -> Option<LogIndex>;

	fn last_index(&self) -> Option<LogIndex>;

	fn term(&self, index: LogIndex) -> Option<Term>;

	fn entry(&self, index: LogIndex) -> Option<LogEntry>;

	/// Appends new entries, truncating any existing entries at or after the first
	/// incoming entry's index (a suffix conflict caused by a previous leader).
	fn append(&self, entries: Vec<LogEntry>);

	/// Declares that no entry before `index` will ever be read again. Backs
	/// `raft::node::Node::done`, which in turn backs the `Done(slot)` call in the
	/// consensus-log interface consumed by `shardkv::log_driver`.
	fn discard_before(&self, index: LogIndex);
}


#[derive(Default)]
struct MemLogInner {
	/// `entries[i]` holds the entry at index `base + i + 1`.
	entries: Vec<LogEntry>,
	/// Index of the entry immediately before `entries[0]` (0 if nothing was ever
	/// discarded).
	base: LogIndex
}

/// The in-process log store used by every `Node` in this crate. Durable persistence
/// is explicitly the consensus layer's concern per the system this crate backs,
/// but nothing here writes to disk — restart-and-replay is out of scope for the
/// in-memory deployments this repository targets (tests and the demo binary); a real
/// deployment would swap this for a write-ahead log on `file::DirLock`-guarded storage.
pub struct MemoryLog {
	inner: Mutex<MemLogInner>
}

impl MemoryLog {
	pub fn new() -> Self {
		MemoryLog { inner: Mutex::new(MemLogInner::default()) }
	}

	fn index_pos(inner: &MemLogInner, index: LogIndex) -> Option<usize> {
		if index <= inner.base {
			return None;
		}
		let pos = (index - inner.base - 1) as usize;
		if pos >= inner.entries.len() {
			return None;
		}
		Some(pos)
	}
}

impl LogStorage for MemoryLog {
	fn first_index(&self) -> Option<LogIndex> {
		let inner = self.inner.lock().unwrap();
		if inner.entries.is_empty() { None } else { Some(inner.base + 1) }
	}

	fn last_index(&self) -> Option<LogIndex> {
		let inner = self.inner.lock().unwrap();
		if inner.entries.is_empty() { None } else { Some(inner.base + inner.entries.len() as LogIndex) }
	}

	fn term(&self, index: LogIndex) -> Option<Term> {
		let inner = self.inner.lock().unwrap();
		if index == inner.base {
			// The term of the (possibly discarded) entry immediately before the log
			// is not retrievable from this in-memory store; callers treat 0 as
			// "unknown but older than anything we hold."
			return Some(0);
		}
		Self::index_pos(&inner, index).map(|p| inner.entries[p].term)
	}

	fn entry(&self, index: LogIndex) -> Option<LogEntry> {
		let inner = self.inner.lock().unwrap();
		Self::index_pos(&inner, index).map(|p| inner.entries[p].clone())
	}

	fn append(&self, new_entries: Vec<LogEntry>) {
		if new_entries.is_empty() {
			return;
		}

		let mut inner = self.inner.lock().unwrap();
		let first_new_index = new_entries[0].index;

		if let Some(pos) = Self::index_pos(&inner, first_new_index) {
			inner.entries.truncate(pos);
		} else if first_new_index > inner.base + 1 {
			// A gap would violate the caller's contract (AppendEntries only ever
			// appends immediately after a matched prev_log_index).
			panic!("non-contiguous append to raft log");
		}

		inner.entries.extend(new_entries);
	}

	fn discard_before(&self, index: LogIndex) {
		let mut inner = self.inner.lock().unwrap();
		if index <= inner.base {
			return;
		}
		let drop_count = (index - inner.base).min(inner.entries.len() as LogIndex) as usize;
		inner.entries.drain(0..drop_count);
		inner.base = index;
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	fn entry(index: LogIndex, term: Term) -> LogEntry {
		LogEntry { index, term, data: LogEntryData::Noop }
	}

	#[test]
	fn append_and_read_back() {
		let log = MemoryLog::new();
		assert_eq!(log.last_index(), None);

		log.append(vec![entry(1, 1), entry(2, 1), entry(3, 2)]);
		assert_eq!(log.first_index(), Some(1));
		assert_eq!(log.last_index(), Some(3));
		assert_eq!(log.term(2), Some(1));
		assert_eq!(log.term(3), Some(2));
	}

	#[test]
	fn append_truncates_conflicting_suffix() {
		let log = MemoryLog::new();
		log.append(vec![entry(1, 1), entry(2, 1), entry(3, 1)]);
		log.append(vec![entry(2, 2)]);

		assert_eq!(log.last_index(), Some(2));
		assert_eq!(log.term(2), Some(2));
	}

	#[test]
	fn discard_before_moves_first_index() {
		let log = MemoryLog::new();
		log.append(vec![entry(1, 1), entry(2, 1), entry(3, 1)]);
		log.discard_before(3);

		assert_eq!(log.first_index(), Some(3));
		assert_eq!(log.entry(1), None);
		assert_eq!(log.entry(3).unwrap().index, 3);
	}
}
