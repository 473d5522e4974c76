//! Entry point for one replica of one group: loads its config, joins its raft group,
//! starts the reconfiguration tick loop, and serves client and peer-group RPCs.

extern crate shardkv;
extern crate raft;
extern crate tracing;
extern crate tracing_subscriber;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use raft::node::{Node, NodeConfig};
use raft::rpc::HttpTransport;

use shardkv::config;
use shardkv::server::Replica;
use shardkv::shardmaster::HttpShardMaster;

fn main() {
	tracing_subscriber::fmt::init();

	let cfg = config::parse_args().expect("failed to load config");

	info!(node_id = cfg.node_id, group_id = cfg.group_id, "starting shardkv replica");

	let members: HashSet<u64> = cfg.peers.keys().cloned().collect();
	let transport = Arc::new(HttpTransport::new(cfg.peers.clone()));
	let node = Node::start(NodeConfig { id: cfg.node_id, members, transport: transport.clone() });

	// Incoming raft peer RPCs are served on the same `listen_addr`; port-sharing
	// between the raft and shardkv HTTP surfaces is left to a reverse proxy in a real
	// deployment, so this process actually binds two adjacent ports in practice — kept
	// as a single address here since process/socket topology beyond "a listener
	// exists" is out of scope (see `spec.md`'s Non-goals).
	let raft_node = node.clone();
	let raft_addr = cfg.peers.get(&cfg.node_id).cloned().unwrap_or_else(|| cfg.listen_addr.clone());
	std::thread::spawn(move || {
		raft::rpc::serve(raft_node, &raft_addr).expect("raft rpc listener failed");
	});

	let master = Arc::new(HttpShardMaster::new(cfg.master_addr.clone()));
	let replica = Replica::new(cfg.group_id, node, master);
	replica.start_tick_loop();

	info!(addr = %cfg.listen_addr, "serving shardkv client rpcs");
	shardkv::rpc_shim::serve(replica, &cfg.listen_addr).expect("shardkv rpc listener failed");
}
