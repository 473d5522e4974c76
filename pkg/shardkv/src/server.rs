//! §2 C7 / §5: the server shell — a single `Mutex`-guarded replica aggregate that every
//! RPC handler and the periodic reconfiguration tick acquire on entry, per the
//! "single per-replica mutex" concurrency model in §5.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use raft::node::Node;

use super::log_driver::OpLog;
use super::op::GroupId;
use super::rpc_shim::RpcClient;
use super::shardmaster::ShardMaster;
use super::state_machine::KvState;

/// How often `tick()` polls the shard master for new configurations (§4.4).
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Everything guarded by the replica's single mutex: the log driver's cursor state
/// and the applied state machine. `config`/`xstate`/`seq`/`last_seq` from §5 all live
/// inside these two fields.
pub struct ReplicaState {
	pub log: OpLog,
	pub kv: KvState
}

/// One member of one replica group. `gid` and `node` are immutable for the life of the
/// process; everything that actually changes over time lives in `state`.
pub struct Replica {
	pub gid: GroupId,
	pub node: Arc<Node>,
	pub master: Arc<dyn ShardMaster>,
	pub rpc: RpcClient,
	/// Static directory of every group's replica addresses, as published in the
	/// shard master's `Groups` field — refreshed opportunistically whenever a new
	/// `Config` is observed (see `reconfig::tick`).
	pub group_addrs: Mutex<HashMap<GroupId, Vec<String>>>,
	state: Mutex<ReplicaState>
}

impl Replica {
	pub fn new(gid: GroupId, node: Arc<Node>, master: Arc<dyn ShardMaster>) -> Arc<Replica> {
		let state = ReplicaState { log: OpLog::new(node.clone()), kv: KvState::new(gid) };

		Arc::new(Replica {
			gid,
			node,
			master,
			rpc: RpcClient::new(),
			group_addrs: Mutex::new(HashMap::new()),
			state: Mutex::new(state)
		})
	}

	/// Acquires the single replica mutex. Every RPC handler and `tick()` go through
	/// this — see §5's note that `logOperation`'s backoff sleeps *while holding the
	/// mutex*, intentionally blocking other local operations until the log catches up.
	pub(crate) fn lock(&self) -> MutexGuard<ReplicaState> {
		self.state.lock().unwrap()
	}

	/// Spawns the periodic `tick()` thread (§4.4, §9's note on the cyclic
	/// self-reference between `tick` and the RPC mutex).
	pub fn start_tick_loop(self: &Arc<Replica>) {
		let replica = self.clone();
		thread::spawn(move || loop {
			replica.tick();
			thread::sleep(TICK_INTERVAL);
		});
	}
}


#[cfg(test)]
mod tests {
	use super::*;
	use crate::shardmaster::FakeMaster;
	use raft::node::NodeConfig;
	use raft::rpc::LocalTransport;

	pub fn solo_replica(gid: GroupId, master: Arc<dyn ShardMaster>) -> Arc<Replica> {
		let mut members = std::collections::HashSet::new();
		members.insert(gid);
		let transport = Arc::new(LocalTransport::new());
		let node = Node::start(NodeConfig { id: gid, members, transport: transport.clone() });
		transport.register(gid, node.clone());
		Replica::new(gid, node, master)
	}

	#[test]
	fn new_replica_starts_with_empty_initial_config() {
		let master = Arc::new(FakeMaster::new());
		let replica = solo_replica(1, master);
		let guard = replica.lock();
		assert_eq!(guard.kv.config.num, 0);
	}
}
