//! §4.5: the `TransferState` RPC handler, called by a group that has just learned it
//! now owns a shard this replica's group used to hold.

use super::op::{Err, ExtState};
use super::server::Replica;
use super::shardmaster::ShardId;

impl Replica {
	/// §4.5's readiness gate: a request for a configuration this replica hasn't caught
	/// up to yet is rejected with `NotReady` rather than served from stale state — the
	/// requester retries on its own next tick. Once past the gate, hands back whatever
	/// `export_shard` has for `shard` right now, which may be empty if this replica
	/// never owned any keys in it.
	pub fn transfer_state(&self, config_num: u64, shard: ShardId) -> (Err, ExtState) {
		let mut guard = self.lock();
		let _ = guard.log.catch_up(&mut guard.kv, self.master.as_ref());

		if guard.kv.config.num < config_num {
			return (Err::NotReady, ExtState::new());
		}

		(Err::Ok, guard.kv.export_shard(shard))
	}
}


#[cfg(test)]
mod tests {
	use super::*;
	use crate::server::tests::solo_replica;
	use crate::shardmaster::{FakeMaster, N_SHARDS, NO_GROUP};
	use std::sync::Arc;

	#[test]
	fn transfer_rejects_a_configuration_this_replica_has_not_reached_yet() {
		let master = Arc::new(FakeMaster::new());
		let replica = solo_replica(1, master);

		let (err, state) = replica.transfer_state(5, 0);
		assert_eq!(err, Err::NotReady);
		assert!(state.kv_store.is_empty());
	}

	#[test]
	fn transfer_exports_only_the_requested_shards_keys() {
		let master = Arc::new(FakeMaster::new());
		let replica = solo_replica(1, master.clone());

		let mut shards = [NO_GROUP; N_SHARDS];
		for s in shards.iter_mut() {
			*s = 1;
		}
		master.publish(shards, std::collections::HashMap::new());
		replica.tick();

		replica.put_append("c1".into(), 1, crate::op::PutAppendKind::Put, b"k".to_vec(), b"v".to_vec()).unwrap();

		let shard = crate::shardmaster::key_shard(b"k");
		let (err, state) = replica.transfer_state(1, shard);
		assert_eq!(err, Err::Ok);
		assert_eq!(state.kv_store.get(&b"k".to_vec()), Some(&b"v".to_vec()));
	}
}
