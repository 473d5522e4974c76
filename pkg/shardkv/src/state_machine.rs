//! §4.2: the key-value store itself, plus the dedup bookkeeping and the apply-time
//! ownership check that everything else in this crate is built around.

use std::collections::HashMap;

use super::op::*;
use super::shardmaster::{key_shard, Config, ShardId};

/// Everything a replica applies decided log entries into. Lives under the single
/// per-replica mutex described in §5; nothing here takes its own lock.
pub struct KvState {
	gid: GroupId,
	pub config: Config,
	kv_store: HashMap<Key, Value>,
	mrrs_map: HashMap<ClientId, u64>,
	replies: HashMap<ClientId, Reply>
}

impl KvState {
	pub fn new(gid: GroupId) -> Self {
		KvState {
			gid,
			config: Config::initial(),
			kv_store: HashMap::new(),
			mrrs_map: HashMap::new(),
			replies: HashMap::new()
		}
	}

	pub fn gid(&self) -> GroupId {
		self.gid
	}

	/// The dedup-table lookup `handlers` needs before deciding whether to log a new
	/// request at all (§4.3 step 2).
	pub fn last_applied_seq(&self, cid: &str) -> Option<u64> {
		self.mrrs_map.get(cid).copied()
	}

	pub fn cached_reply(&self, cid: &str) -> Option<Reply> {
		self.replies.get(cid).cloned()
	}

	/// §4.2 `doGet`: ownership is checked against `self.config`, which only ever
	/// changes when a `Reconf` op is applied — never at RPC-entry time.
	pub fn do_get(&self, key: &[u8]) -> Reply {
		if !owns_shard(&self.config, self.gid, key_shard(key)) {
			return Reply::error(Err::WrongGroup);
		}

		match self.kv_store.get(key) {
			Some(v) => Reply::ok(v.clone()),
			None => Reply::error(Err::NoKey)
		}
	}

	/// §4.2 `doPutAppend`.
	pub fn do_put_append(&mut self, kind: PutAppendKind, key: &[u8], value: &[u8]) -> Reply {
		if !owns_shard(&self.config, self.gid, key_shard(key)) {
			return Reply::error(Err::WrongGroup);
		}

		match kind {
			PutAppendKind::Put => {
				self.kv_store.insert(key.to_vec(), value.to_vec());
			}
			PutAppendKind::Append => {
				self.kv_store.entry(key.to_vec()).or_insert_with(Vec::new).extend_from_slice(value);
			}
		}

		Reply::ok(Vec::new())
	}

	/// The "record rule" from §4.1: a reply that is *not* `ErrWrongGroup` updates the
	/// dedup table; a wrong-group reply must not be recorded, so the client is free
	/// to retry elsewhere.
	fn record(&mut self, cid: &str, seq: u64, reply: &Reply) {
		if reply.err == Err::WrongGroup {
			return;
		}
		self.mrrs_map.insert(cid.to_string(), seq);
		self.replies.insert(cid.to_string(), reply.clone());
	}

	/// Applies one decided log entry (§4.1 "Application rules"). Returns the reply
	/// produced — for `Reconf`, a benign `Ok` with no payload, since reconfiguration
	/// has no client waiting on a cached reply.
	pub fn apply(&mut self, op: &Op, new_config: Option<Config>) -> Reply {
		match op {
			Op::Get { cid, seq, key } => {
				let reply = self.do_get(key);
				self.record(cid, *seq, &reply);
				reply
			}
			Op::Put { cid, seq, key, value } => {
				let reply = self.do_put_append(PutAppendKind::Put, key, value);
				self.record(cid, *seq, &reply);
				reply
			}
			Op::Append { cid, seq, key, value } => {
				let reply = self.do_put_append(PutAppendKind::Append, key, value);
				self.record(cid, *seq, &reply);
				reply
			}
			Op::Reconf { extra, .. } => {
				// `new_config` is fetched by the caller (the log driver) via the
				// shard master's `Query(config_num)` — this module never talks to
				// the shard master itself.
				if let Some(c) = new_config {
					self.config = c;
				}
				self.merge_external(extra.clone());
				Reply::ok(Vec::new())
			}
		}
	}

	fn merge_external(&mut self, incoming: ExtState) {
		let mut current = ExtState {
			kv_store: std::mem::take(&mut self.kv_store),
			mrrs_map: std::mem::take(&mut self.mrrs_map),
			replies: std::mem::take(&mut self.replies)
		};
		current.merge(incoming);
		self.kv_store = current.kv_store;
		self.mrrs_map = current.mrrs_map;
		self.replies = current.replies;
	}

	/// Builds the snapshot handed out by `TransferState` (§4.5): every key in
	/// `shard`, plus the *entire* dedup table (a client may have migrated across
	/// shards, so a partial dedup table could let an old request double-apply).
	pub fn export_shard(&self, shard: ShardId) -> ExtState {
		let kv_store = self.kv_store.iter()
			.filter(|(k, _)| key_shard(k) == shard)
			.map(|(k, v)| (k.clone(), v.clone()))
			.collect();

		ExtState {
			kv_store,
			mrrs_map: self.mrrs_map.clone(),
			replies: self.replies.clone()
		}
	}
}
