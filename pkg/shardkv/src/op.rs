//! The unit written to the consensus log (§3 `Op`), its reply, and the transferable
//! snapshot (§3 `ExtState`) handed between groups on reconfiguration.

use std::collections::HashMap;

use super::shardmaster::{Config, ShardId};

pub type GroupId = u64;
pub type ClientId = String;
pub type Key = Vec<u8>;
pub type Value = Vec<u8>;

/// The closed set of error codes observable to RPC callers (§6, §7).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Err {
	Ok,
	NoKey,
	WrongGroup,
	NotReady
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
	pub err: Err,
	pub value: Value
}

impl Reply {
	pub fn ok(value: Value) -> Self {
		Reply { err: Err::Ok, value }
	}

	pub fn error(err: Err) -> Self {
		Reply { err, value: Vec::new() }
	}

	/// The benign empty reply handed back for a stale retry (§4.3 step 2).
	pub fn benign() -> Self {
		Reply { err: Err::Ok, value: Vec::new() }
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PutAppendKind {
	Put,
	Append
}

/// A single entry logged through the consensus substrate. `Reconf` reuses `seq` to
/// carry the target configuration number, per §3 and the third Open Question in §9 —
/// `is_same` below branches on the variant first for exactly this reason.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Op {
	Get { cid: ClientId, seq: u64, key: Key },
	Put { cid: ClientId, seq: u64, key: Key, value: Value },
	Append { cid: ClientId, seq: u64, key: Key, value: Value },
	Reconf { config_num: u64, extra: ExtState }
}

impl Op {
	pub fn put_append(kind: PutAppendKind, cid: ClientId, seq: u64, key: Key, value: Value) -> Self {
		match kind {
			PutAppendKind::Put => Op::Put { cid, seq, key, value },
			PutAppendKind::Append => Op::Append { cid, seq, key, value }
		}
	}

	pub fn client_id(&self) -> Option<&ClientId> {
		match self {
			Op::Get { cid, .. } | Op::Put { cid, .. } | Op::Append { cid, .. } => Some(cid),
			Op::Reconf { .. } => None
		}
	}

	pub fn seq(&self) -> u64 {
		match self {
			Op::Get { seq, .. } | Op::Put { seq, .. } | Op::Append { seq, .. } => *seq,
			Op::Reconf { config_num, .. } => *config_num
		}
	}

	/// The "same proposal" predicate from §3: kind must match, and then either the
	/// config number (for `Reconf`) or `(cid, seq)` (for client ops) must match. The
	/// `ExtState` payload of a `Reconf` is deliberately *not* compared — two replicas
	/// racing to propose the same reconfiguration may carry non-byte-identical but
	/// equally valid snapshots (§9).
	pub fn is_same(&self, other: &Op) -> bool {
		match (self, other) {
			(Op::Get { cid: c1, seq: s1, .. }, Op::Get { cid: c2, seq: s2, .. }) => c1 == c2 && s1 == s2,
			(Op::Put { cid: c1, seq: s1, .. }, Op::Put { cid: c2, seq: s2, .. }) => c1 == c2 && s1 == s2,
			(Op::Append { cid: c1, seq: s1, .. }, Op::Append { cid: c2, seq: s2, .. }) => c1 == c2 && s1 == s2,
			(Op::Reconf { config_num: n1, .. }, Op::Reconf { config_num: n2, .. }) => n1 == n2,
			_ => false
		}
	}
}

/// The transferable part of the state machine (§3): the key-value store plus the
/// per-client dedup table, both restricted to whatever subset is relevant to a given
/// transfer (a single shard's keys for `TransferState`, or everything for a merge).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtState {
	pub kv_store: HashMap<Key, Value>,
	pub mrrs_map: HashMap<ClientId, u64>,
	pub replies: HashMap<ClientId, Reply>
}

impl ExtState {
	pub fn new() -> Self {
		ExtState::default()
	}

	/// Merges `other` into `self` in place, per §3: `kv_store` entries union (on a
	/// key collision the incoming side wins, though in practice shards transferred
	/// into a `Reconf` are disjoint across senders); for each client, keep whichever
	/// side has the higher `Seq`.
	pub fn merge(&mut self, other: ExtState) {
		for (k, v) in other.kv_store {
			self.kv_store.insert(k, v);
		}

		for (cid, seq) in other.mrrs_map {
			let keep_incoming = self.mrrs_map.get(&cid).map(|&existing| seq > existing).unwrap_or(true);
			if keep_incoming {
				self.mrrs_map.insert(cid.clone(), seq);
				if let Some(reply) = other.replies.get(&cid) {
					self.replies.insert(cid, reply.clone());
				}
			}
		}
	}
}

/// Shard ownership check shared by `state_machine` and `transfer` (§4.2, §4.5): does
/// `config` currently assign `shard` to `gid`?
pub fn owns_shard(config: &Config, gid: GroupId, shard: ShardId) -> bool {
	config.shards[shard] == gid
}
