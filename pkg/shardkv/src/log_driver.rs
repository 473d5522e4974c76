//! §4.1: the op log driver — `log_operation`/`catch_up` — sitting between the
//! request handlers and the raw consensus substrate (`raft::node::Node`).
//!
//! Adaptation note (see `SPEC_FULL.md` and `DESIGN.md`): the spec's
//! `Start(slot, value)`/`Status(slot)` interface is modeled on a multi-instance Paxos
//! log, where any replica can drive any slot to a decision regardless of leadership.
//! `raft::node::Node` instead exposes a single-leader, tail-append log: `propose`
//! always appends at the next free index and fails outright if this replica isn't the
//! leader. `log_operation` below adapts by treating "not currently the leader" as a
//! `LogDriverError::NotLeader` the caller must propagate — never by blocking forever
//! hoping this replica becomes leader — matching §7's policy that lower-level
//! failures "surface as a boolean 'call failed'" rather than as one of the closed set
//! of wire error codes.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use raft::consensus::ProposalStatus;
use raft::node::Node;
use raft::protos::{LogEntryData, LogIndex};

use super::op::Op;
use super::shardmaster::ShardMaster;
use super::state_machine::KvState;

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum LogDriverError {
	/// This replica does not currently believe it is the leader of its group.
	NotLeader,
	Encode(super::errors::Error)
}

pub struct OpLog {
	node: Arc<Node>,

	/// Next log position this replica will attempt to propose into. Advisory under
	/// the raft substrate (which assigns indices itself); kept so the invariant in
	/// §3 I1 ("last_seq ≤ seq") remains checkable, and so a future multi-instance
	/// substrate could slot in without changing this module's public shape.
	seq: LogIndex,

	/// Next log position this replica needs to apply. Every slot `< last_seq` has
	/// already been applied to the state machine (§3 I1).
	last_seq: LogIndex,

	last_reply: Option<super::op::Reply>
}

impl OpLog {
	pub fn new(node: Arc<Node>) -> Self {
		OpLog { node, seq: 1, last_seq: 1, last_reply: None }
	}

	/// §4.1 contract: returns only once some slot `s >= seq(on entry)` has been
	/// decided with a value equal to `op` under `Op::is_same`. Does *not* guarantee
	/// the caller's own proposal won that slot — a concurrent proposer may have filled
	/// it first, which is exactly why `Commited` alone isn't enough: the slot this
	/// proposal landed at might have decided *someone else's* op instead, and the
	/// caller has to re-propose in that case rather than return as if its own op went
	/// in.
	pub fn log_operation(&mut self, op: &Op) -> Result<(), LogDriverError> {
		let encoded = super::rpc_shim::marshal(op).map_err(LogDriverError::Encode)?;

		let mut backoff = INITIAL_BACKOFF;

		loop {
			let proposal = self.node.propose(encoded.clone()).map_err(|_| LogDriverError::NotLeader)?;

			loop {
				match self.node.proposal_status(proposal) {
					ProposalStatus::Commited => {
						if self.decided_value_matches(proposal.index, op) {
							self.seq = proposal.index + 1;
							return Ok(());
						}
						// Someone else's op won this slot. Re-propose at a fresh
						// index with a reset backoff.
						backoff = INITIAL_BACKOFF;
						break;
					}
					ProposalStatus::Failed => {
						// Lost a leadership race after proposing; re-propose at a
						// fresh index with a reset backoff.
						backoff = INITIAL_BACKOFF;
						break;
					}
					ProposalStatus::Pending | ProposalStatus::Missing => {
						thread::sleep(backoff);
						backoff = (backoff * 2).min(MAX_BACKOFF);
					}
				}
			}
		}
	}

	/// Decodes whatever was actually decided at `index` and compares it against `op`
	/// under `Op::is_same` (§3/§9). A slot that decided a `Noop`, or an entry this
	/// replica can't decode, never matches.
	fn decided_value_matches(&self, index: LogIndex, op: &Op) -> bool {
		match self.node.entry_at(index) {
			Some(entry) => match entry.data {
				LogEntryData::Command(bytes) => super::rpc_shim::unmarshal::<Op>(&bytes)
					.map(|decided| decided.is_same(op))
					.unwrap_or(false),
				LogEntryData::Noop => false
			},
			None => false
		}
	}

	/// §4.1 `catchUp`: applies every decided slot in `[last_seq, commit_index]` to
	/// `state` in order, returning the reply produced by the last application (or the
	/// previously cached one if nothing new was applied). Every applied slot is
	/// acknowledged via `Node::done` so the log may be compacted.
	pub fn catch_up(&mut self, state: &mut KvState, master: &dyn ShardMaster) -> super::op::Reply {
		let commit = self.node.commit_index();

		while self.last_seq <= commit {
			if let Some(entry) = self.node.entry_at(self.last_seq) {
				if let LogEntryData::Command(bytes) = entry.data {
					if let Ok(op) = super::rpc_shim::unmarshal::<Op>(&bytes) {
						let new_config = if let Op::Reconf { config_num, .. } = &op {
							Some(master.query(Some(*config_num)))
						} else {
							None
						};

						let reply = state.apply(&op, new_config);
						self.last_reply = Some(reply);
					}
				}
				// `LogEntryData::Noop` occupies a slot but has no state-machine
				// effect — still advances `last_seq` past it below.

				self.node.done(self.last_seq);
			}

			self.last_seq += 1;
		}

		self.last_reply.clone().unwrap_or_else(super::op::Reply::benign)
	}
}
