//! The shard master interface this crate *consumes*. The shard master itself — the
//! service that decides dynamic resharding policy and hands out new `Config`s — is an
//! external collaborator (`spec.md` §1): this module only defines what `shardkv` needs
//! from it, plus an in-memory fake used by this crate's own tests.

use std::collections::HashMap;
use std::hash::Hasher;

use siphasher::sip::SipHasher13;

use super::op::GroupId;

/// Number of shards the key space is statically partitioned into. A real deployment
/// would get this from the shard master too, but it's conventionally fixed for the
/// lifetime of a cluster, so callers just import the constant.
pub const N_SHARDS: usize = 10;

/// The "no group" sentinel: config 0 assigns every shard to this group id, meaning
/// "nobody owns this shard yet."
pub const NO_GROUP: GroupId = 0;

pub type ShardId = usize;

/// A single numbered configuration, as published by the shard master.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
	pub num: u64,
	pub shards: [GroupId; N_SHARDS],
	pub groups: HashMap<GroupId, Vec<String>>
}

impl Config {
	pub fn initial() -> Self {
		Config { num: 0, shards: [NO_GROUP; N_SHARDS], groups: HashMap::new() }
	}
}

/// Maps a key to its shard via a fixed, deterministic hash — any client or replica
/// computing this for the same key must agree, since it determines ownership.
pub fn key_shard(key: &[u8]) -> ShardId {
	let mut hasher = SipHasher13::new();
	hasher.write(key);
	(hasher.finish() % N_SHARDS as u64) as ShardId
}

/// The external shard master API this crate consumes: `Query(n)` returns
/// configuration `n`, or the latest configuration if `n == -1` is encoded as `None`.
pub trait ShardMaster: Send + Sync {
	fn query(&self, num: Option<u64>) -> Config;
}


/// A `ShardMaster` reached over HTTP, for a production deployment where the shard
/// master is a separate, externally-run process (§1: "an external, already-correct
/// collaborator"). Uses the same `rmp_serde` wire convention as the rest of this
/// crate's RPCs.
pub struct HttpShardMaster {
	addr: String,
	client: hyper::Client<hyper::client::HttpConnector>
}

impl HttpShardMaster {
	pub fn new(addr: String) -> Self {
		HttpShardMaster { addr, client: hyper::Client::new() }
	}
}

impl HttpShardMaster {
	fn try_query(&self, num: Option<u64>) -> Result<Config, ()> {
		use futures::{Future, Stream};

		let uri: hyper::Uri = format!("{}/shardmaster/query", self.addr).parse().map_err(|_| ())?;
		let body = super::rpc_shim::marshal(&num).map_err(|_| ())?;

		let mut req = hyper::Request::new(hyper::Method::Post, uri);
		req.set_body(body);

		let bytes = self.client.request(req).and_then(|res| res.body().concat2()).wait().map_err(|_| ())?;
		super::rpc_shim::unmarshal(&bytes).map_err(|_| ())
	}
}

impl ShardMaster for HttpShardMaster {
	/// The shard master is assumed to be always-eventually-reachable (§1 treats it as
	/// an external, already-correct collaborator) — a transient network failure here
	/// is retried with backoff rather than surfaced to the caller, the same posture
	/// `log_driver::OpLog::log_operation` takes toward its own consensus substrate.
	fn query(&self, num: Option<u64>) -> Config {
		let mut backoff = std::time::Duration::from_millis(10);
		loop {
			if let Ok(config) = self.try_query(num) {
				return config;
			}
			std::thread::sleep(backoff);
			backoff = (backoff * 2).min(std::time::Duration::from_secs(1));
		}
	}
}


/// An in-memory shard master used only by this crate's tests: a fixed, ahead-of-time
/// loaded sequence of configurations that a test can append to mid-run to exercise
/// `shardkv::reconfig`'s tick loop.
pub struct FakeMaster {
	configs: std::sync::Mutex<Vec<Config>>
}

impl FakeMaster {
	pub fn new() -> Self {
		FakeMaster { configs: std::sync::Mutex::new(vec![Config::initial()]) }
	}

	/// Publishes a new configuration one number past the current latest.
	pub fn publish(&self, shards: [GroupId; N_SHARDS], groups: HashMap<GroupId, Vec<String>>) -> u64 {
		let mut configs = self.configs.lock().unwrap();
		let num = configs.len() as u64;
		configs.push(Config { num, shards, groups });
		num
	}
}

impl ShardMaster for FakeMaster {
	fn query(&self, num: Option<u64>) -> Config {
		let configs = self.configs.lock().unwrap();
		match num {
			None => configs.last().unwrap().clone(),
			Some(n) => configs.get(n as usize).cloned().unwrap_or_else(|| configs.last().unwrap().clone())
		}
	}
}
