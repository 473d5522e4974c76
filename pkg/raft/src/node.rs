//! The thing `shardkv::log_driver` actually depends on: a thread-per-node wrapper
//! around `ConsensusModule` exposing the small polling interface the rest of this
//! repository treats as "the consensus log" (see `spec.md` §1 and §6):
//! `propose`/`proposal_status`/`entry_at`/`done`/`kill`.
//!
//! Unlike the classic multi-instance Paxos log this interface is modeled after (where
//! a caller picks an arbitrary slot to `Start` a value at), a raft log only ever grows
//! at its tail: `propose` always appends at the next free index and hands the caller
//! back the `(term, index)` it landed at. `shardkv::log_driver::OpLog::log_operation`
//! adapts to this by re-proposing at a fresh index whenever `proposal_status` reports
//! `Failed` for its previous attempt, rather than retrying the same slot — the two are
//! equivalent from the caller's point of view, since both converge on "some slot Ś
//! decided with a value equal to what I tried to propose."

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::consensus::*;
use super::errors::*;
use super::log::MemoryLog;
use super::protos::*;
use super::rpc::Transport;

pub struct NodeConfig {
	pub id: ServerId,
	pub members: std::collections::HashSet<ServerId>,
	pub transport: Arc<dyn Transport>
}

pub struct Node {
	module: Mutex<ConsensusModule>,
	transport: Arc<dyn Transport>,
	killed: AtomicBool
}

impl Node {
	/// Starts a node and its background tick thread. Mirrors the teacher's
	/// `Node::start(NodeConfig)` entry point in spirit (`main.rs`), minus the on-disk
	/// bootstrap/join dance, which this crate's "in-memory, statically-configured
	/// groups" deployment model doesn't need.
	pub fn start(cfg: NodeConfig) -> Arc<Node> {
		let solo = cfg.members.len() == 1;
		let config = Configuration::new(cfg.members);
		let log = Arc::new(MemoryLog::new());
		let mut module = ConsensusModule::new(cfg.id, Metadata::default(), config, log);

		// A group of one is trivially its own majority; skip the election timeout
		// rather than making every single-member-group test wait one out.
		if solo {
			module.become_leader();
		}

		let node = Arc::new(Node {
			module: Mutex::new(module),
			transport: cfg.transport,
			killed: AtomicBool::new(false)
		});

		let bg = node.clone();
		thread::spawn(move || bg.run_tick_loop());

		node
	}

	fn run_tick_loop(self: Arc<Node>) {
		loop {
			if self.killed.load(Ordering::SeqCst) {
				return;
			}

			let tick = {
				let mut m = self.module.lock().unwrap();
				m.tick(Instant::now())
			};

			self.dispatch(tick.messages);

			thread::sleep(tick.next_tick.unwrap_or(Duration::from_millis(150)));
		}
	}

	fn dispatch(&self, messages: Vec<OutgoingMessage>) {
		for msg in messages {
			let transport = self.transport.clone();

			match msg.body {
				OutgoingBody::AppendEntries(req) => {
					if let Ok(resp) = transport.append_entries(msg.to, req) {
						self.step_append_entries_response(msg.to, resp);
					}
				}
				OutgoingBody::RequestVote(req) => {
					if let Ok(resp) = transport.request_vote(msg.to, req) {
						self.step_request_vote_response(msg.to, resp);
					}
				}
			}
		}
	}

	fn step_append_entries_response(&self, from: ServerId, resp: AppendEntriesResponse) {
		let mut m = self.module.lock().unwrap();
		m.record_append_entries_response(from, resp);
	}

	fn step_request_vote_response(&self, from: ServerId, resp: RequestVoteResponse) {
		if !resp.vote_granted {
			return;
		}
		let mut m = self.module.lock().unwrap();
		if resp.term != m.meta().current_term {
			return;
		}
		if !m.is_leader() {
			m.become_leader();
		}
		let _ = from;
	}

	/// Proposes `data` (an `rmp_serde`-encoded `shardkv::op::Op`) onto the log.
	/// Returns `Err` if this node does not currently believe itself to be the
	/// leader — the caller should retry against another replica.
	pub fn propose(&self, data: Vec<u8>) -> ProposeResult {
		let mut m = self.module.lock().unwrap();
		let mut out = Tick::empty();
		let result = m.propose_command(data, &mut out);
		drop(m);
		self.dispatch(out.messages);
		result
	}

	pub fn proposal_status(&self, p: Proposal) -> ProposalStatus {
		self.module.lock().unwrap().proposal_status(p)
	}

	/// Reads back the value at `index` once it is known to this replica (whether or
	/// not it has committed yet — callers must check `proposal_status` first).
	pub fn entry_at(&self, index: LogIndex) -> Option<LogEntry> {
		self.module.lock().unwrap().entry_at(index)
	}

	pub fn commit_index(&self) -> LogIndex {
		self.module.lock().unwrap().commit_index()
	}

	/// Declares that slots before `index` will never be needed again, allowing the
	/// log to be compacted. Safe to call repeatedly with non-decreasing indices.
	pub fn done(&self, index: LogIndex) {
		self.module.lock().unwrap().discard_before(index);
	}

	pub fn kill(&self) {
		self.killed.store(true, Ordering::SeqCst);
	}

	pub fn id(&self) -> ServerId {
		self.module.lock().unwrap().id()
	}

	pub fn step_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesResponse {
		let mut m = self.module.lock().unwrap();
		let mut out = Tick::empty();
		let resp = m.step_append_entries(req, &mut out);
		resp
	}

	pub fn step_request_vote(&self, req: RequestVoteRequest) -> RequestVoteResponse {
		let mut m = self.module.lock().unwrap();
		let mut out = Tick::empty();
		m.step_request_vote(req, &mut out)
	}
}


#[cfg(test)]
mod tests {
	use super::*;
	use super::super::rpc::LocalTransport;

	#[test]
	fn single_node_group_proposes_and_commits() {
		let mut members = std::collections::HashSet::new();
		members.insert(1);
		let transport = Arc::new(LocalTransport::new());

		let node = Node::start(NodeConfig { id: 1, members, transport: transport.clone() });
		transport.register(1, node.clone());

		// A single-member group becomes its own leader immediately, no election wait.
		let proposal = node.propose(b"op-bytes".to_vec()).unwrap();

		// single-node groups commit synchronously inside `propose`.
		assert_eq!(node.proposal_status(proposal), ProposalStatus::Commited);
		assert_eq!(node.entry_at(proposal.index).unwrap().index, proposal.index);

		node.kill();
	}
}
