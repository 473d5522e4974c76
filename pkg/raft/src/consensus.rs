use super::protos::*;
use super::state::*;
use super::log::*;

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;

// NOTE: Blocking on a proposal to get some conclusion is the role of whatever calls
// into this module (see `raft::node::Node`, which exposes the polling `Status`-style
// interface that `shardkv::log_driver` actually consumes).

/// At some random time in this range of milliseconds, a follower will become a candidate if no
/// heartbeat or vote request has been seen.
const ELECTION_TIMEOUT: (u64, u64) = (400, 800);

/// If the leader doesn't send anything else within this amount of time, then it will send an empty heartbeat to all followers (this default value would mean around 6 heartbeats each second)
const HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(150);


/// A single accepted (but not necessarily yet committed) log position. Basically the
/// same type as a raw `LogPosition`; kept as a distinct alias so that the propose/status
/// API reads the way the Raft paper describes it.
pub type Proposal = LogPosition;

pub type ProposeResult = std::result::Result<Proposal, ProposeError>;

#[derive(Debug)]
pub enum ProposeError {
	/// This server isn't the leader right now; if known, a hint at who is.
	NotLeader { leader_hint: Option<ServerId> }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalStatus {
	/// Safely replicated to a majority and committed; will be applied soon (or
	/// already has been).
	Commited,

	/// Abandoned — typically because a newer leader overwrote this log position
	/// before it committed. The caller must re-propose.
	Failed,

	/// Still pending replication.
	Pending,

	/// We hold no information about this index right now (e.g. it's beyond our
	/// locally known log).
	Missing
}


/// Represents all external side effects requested by the ConsensusModule during a
/// single operation. The caller (`Node`) is responsible for carrying these out —
/// sending messages, persisting metadata — the module itself never performs I/O.
pub struct Tick {
	pub time: Instant,
	pub meta: bool,
	pub messages: Vec<OutgoingMessage>,
	pub next_tick: Option<Duration>
}

impl Tick {
	pub fn empty() -> Self {
		Tick { time: Instant::now(), meta: false, messages: vec![], next_tick: None }
	}

	pub fn write_meta(&mut self) {
		self.meta = true;
	}

	pub fn send(&mut self, to: ServerId, body: OutgoingBody) {
		self.messages.push(OutgoingMessage { to, body });
	}
}

pub enum OutgoingBody {
	AppendEntries(AppendEntriesRequest),
	RequestVote(RequestVoteRequest)
}

pub struct OutgoingMessage {
	pub to: ServerId,
	pub body: OutgoingBody
}


pub struct ConsensusModule {
	id: ServerId,
	meta: Metadata,
	config: Configuration,
	log: Arc<dyn LogStorage>,
	state: ServerState
}

impl ConsensusModule {
	/// Creates a new consensus module given the current/initial persisted state.
	pub fn new(id: ServerId, mut meta: Metadata, config: Configuration, log: Arc<dyn LogStorage>) -> Self {
		let last_log_term = log.last_index().and_then(|i| log.term(i)).unwrap_or(0);
		if last_log_term > meta.current_term {
			meta.current_term = last_log_term;
			meta.voted_for = None;
		}

		ConsensusModule { id, meta, config, log, state: ServerState::new_follower(Instant::now()) }
	}

	pub fn id(&self) -> ServerId {
		self.id
	}

	pub fn meta(&self) -> &Metadata {
		&self.meta
	}

	pub fn is_leader(&self) -> bool {
		self.state.is_leader()
	}

	pub fn commit_index(&self) -> LogIndex {
		self.meta.commit_index
	}

	/// Propose a new opaque command. On success, the returned `Proposal` identifies
	/// the log position the caller must watch via `proposal_status` to learn whether
	/// it committed.
	pub fn propose_command(&mut self, data: Vec<u8>, out: &mut Tick) -> ProposeResult {
		self.propose_entry(LogEntryData::Command(data), out)
	}

	pub fn propose_noop(&mut self, out: &mut Tick) -> ProposeResult {
		self.propose_entry(LogEntryData::Noop, out)
	}

	fn propose_entry(&mut self, data: LogEntryData, out: &mut Tick) -> ProposeResult {
		if !self.state.is_leader() {
			return Err(ProposeError::NotLeader { leader_hint: None });
		}

		let index = self.log.last_index().unwrap_or(0) + 1;
		let term = self.meta.current_term;

		self.log.append(vec![LogEntry { index, term, data }]);

		// A single-node group commits immediately; multi-node groups need a quorum of
		// match_index updates from `step_append_entries_response`, which this entry's
		// own reflected-back progress (below) starts counting toward.
		if let ServerState::Leader(ref mut leader) = self.state {
			if let Some(p) = leader.progress.get_mut(&self.id) {
				p.match_index = index;
				p.next_index = index + 1;
			}
		}
		self.advance_commit_index();

		self.broadcast_append_entries(out);

		Ok(Proposal { term, index })
	}

	/// Returns what we currently believe about a given log position.
	pub fn proposal_status(&self, p: Proposal) -> ProposalStatus {
		match self.log.entry(p.index) {
			None => {
				if self.log.first_index().map(|f| p.index < f).unwrap_or(false) {
					// Truncated away by a `discard_before` boundary: we'll never know.
					ProposalStatus::Failed
				} else {
					ProposalStatus::Missing
				}
			}
			Some(e) => {
				if e.term != p.term {
					ProposalStatus::Failed
				} else if self.meta.commit_index >= p.index {
					ProposalStatus::Commited
				} else {
					ProposalStatus::Pending
				}
			}
		}
	}

	/// Reads back the decoded value sitting at `index`, if any has been appended
	/// (committed or not). `raft::node::Node::status` uses this to hand the
	/// `shardkv::log_driver` its `Decided` values.
	pub fn entry_at(&self, index: LogIndex) -> Option<LogEntry> {
		self.log.entry(index)
	}

	pub fn discard_before(&self, index: LogIndex) {
		self.log.discard_before(index);
	}

	fn advance_commit_index(&mut self) {
		let quorum = self.config.quorum_size();

		let leader = match self.state {
			ServerState::Leader(ref l) => l,
			_ => return
		};

		let mut match_indices: Vec<LogIndex> = leader.progress.values().map(|p| p.match_index).collect();
		match_indices.sort_unstable_by(|a, b| b.cmp(a));

		if match_indices.len() < quorum {
			return;
		}

		let candidate_index = match_indices[quorum - 1];
		// Only entries from the current term may be committed by counting replicas
		// (the Raft paper's §5.4.2 restriction against committing old-term entries
		// indirectly).
		if candidate_index > self.meta.commit_index {
			if let Some(e) = self.log.entry(candidate_index) {
				if e.term == self.meta.current_term {
					self.meta.commit_index = candidate_index;
				}
			}
		}
	}

	fn broadcast_append_entries(&self, out: &mut Tick) {
		let leader = match self.state {
			ServerState::Leader(ref l) => l,
			_ => return
		};

		for (&peer, progress) in leader.progress.iter() {
			if peer == self.id {
				continue;
			}

			let prev_log_index = progress.next_index.saturating_sub(1);
			let prev_log_term = self.log.term(prev_log_index).unwrap_or(0);

			let mut entries = vec![];
			let mut i = progress.next_index;
			while let Some(e) = self.log.entry(i) {
				entries.push(e);
				i += 1;
			}

			out.send(peer, OutgoingBody::AppendEntries(AppendEntriesRequest {
				term: self.meta.current_term,
				leader_id: self.id,
				prev_log_index,
				prev_log_term,
				entries,
				leader_commit: self.meta.commit_index
			}));
		}
	}

	/// Applies an incoming `AppendEntries` from the current (or a stale) leader.
	pub fn step_append_entries(&mut self, req: AppendEntriesRequest, out: &mut Tick) -> AppendEntriesResponse {
		if req.term < self.meta.current_term {
			return AppendEntriesResponse { term: self.meta.current_term, success: false, last_log_index: self.log.last_index() };
		}

		if req.term > self.meta.current_term {
			self.meta.current_term = req.term;
			self.meta.voted_for = None;
			out.write_meta();
		}

		self.become_follower(out.time);

		let prev_ok = req.prev_log_index == 0
			|| self.log.term(req.prev_log_index) == Some(req.prev_log_term);

		if !prev_ok {
			return AppendEntriesResponse { term: self.meta.current_term, success: false, last_log_index: self.log.last_index() };
		}

		if !req.entries.is_empty() {
			self.log.append(req.entries);
		}

		if req.leader_commit > self.meta.commit_index {
			self.meta.commit_index = req.leader_commit.min(self.log.last_index().unwrap_or(0));
		}

		AppendEntriesResponse { term: self.meta.current_term, success: true, last_log_index: self.log.last_index() }
	}

	/// Updates this leader's view of `from`'s replication progress from an
	/// `AppendEntries` response, and re-checks whether a new prefix of the log has
	/// reached quorum. A stale response from a term we've since moved past is ignored;
	/// a response carrying a newer term demotes us to follower.
	pub fn record_append_entries_response(&mut self, from: ServerId, resp: AppendEntriesResponse) {
		if resp.term > self.meta.current_term {
			self.meta.current_term = resp.term;
			self.meta.voted_for = None;
			self.become_follower(Instant::now());
			return;
		}

		let leader = match self.state {
			ServerState::Leader(ref mut l) => l,
			_ => return
		};

		let progress = match leader.progress.get_mut(&from) {
			Some(p) => p,
			None => return
		};

		if resp.success {
			if let Some(last) = resp.last_log_index {
				progress.match_index = last;
				progress.next_index = last + 1;
			}
		} else {
			progress.next_index = progress.next_index.saturating_sub(1).max(1);
		}

		self.advance_commit_index();
	}

	/// Applies an incoming `RequestVote`.
	pub fn step_request_vote(&mut self, req: RequestVoteRequest, out: &mut Tick) -> RequestVoteResponse {
		if req.term < self.meta.current_term {
			return RequestVoteResponse { term: self.meta.current_term, vote_granted: false };
		}

		if req.term > self.meta.current_term {
			self.meta.current_term = req.term;
			self.meta.voted_for = None;
			self.become_follower(out.time);
			out.write_meta();
		}

		let our_last_index = self.log.last_index().unwrap_or(0);
		let our_last_term = self.log.term(our_last_index).unwrap_or(0);
		let candidate_up_to_date = req.last_log_term > our_last_term
			|| (req.last_log_term == our_last_term && req.last_log_index >= our_last_index);

		let can_vote = match self.meta.voted_for {
			None => true,
			Some(c) => c == req.candidate_id
		};

		if can_vote && candidate_up_to_date {
			self.meta.voted_for = Some(req.candidate_id);
			out.write_meta();
			RequestVoteResponse { term: self.meta.current_term, vote_granted: true }
		} else {
			RequestVoteResponse { term: self.meta.current_term, vote_granted: false }
		}
	}

	fn become_follower(&mut self, now: Instant) {
		self.state = ServerState::new_follower(now + Self::random_election_timeout());
	}

	fn become_candidate(&mut self, now: Instant) -> RequestVoteRequest {
		self.meta.current_term += 1;
		self.meta.voted_for = Some(self.id);

		let mut votes = std::collections::HashSet::new();
		votes.insert(self.id);
		self.state = ServerState::Candidate {
			election_deadline: now + Self::random_election_timeout(),
			state: CandidateState { votes_received: votes }
		};

		let last_index = self.log.last_index().unwrap_or(0);
		RequestVoteRequest {
			term: self.meta.current_term,
			candidate_id: self.id,
			last_log_index: last_index,
			last_log_term: self.log.term(last_index).unwrap_or(0)
		}
	}

	pub fn become_leader(&mut self) {
		let next_index = self.log.last_index().unwrap_or(0) + 1;
		self.state = ServerState::new_leader(self.config.iter().cloned(), next_index);
	}

	/// Drives timeouts: election timeouts for followers/candidates, heartbeats for
	/// leaders. Returns the side effects that must be carried out by the caller.
	pub fn tick(&mut self, now: Instant) -> Tick {
		let mut out = Tick::empty();
		out.time = now;

		let deadline = match &self.state {
			ServerState::Follower { election_deadline } => Some(*election_deadline),
			ServerState::Candidate { election_deadline, .. } => Some(*election_deadline),
			ServerState::Leader(_) => None
		};

		match deadline {
			Some(election_deadline) if now >= election_deadline => {
				let req = self.become_candidate(now);
				out.write_meta();
				let peers: Vec<ServerId> = self.config.iter().cloned().collect();
				for peer in peers {
					if peer != self.id {
						out.send(peer, OutgoingBody::RequestVote(RequestVoteRequest {
							term: req.term,
							candidate_id: req.candidate_id,
							last_log_index: req.last_log_index,
							last_log_term: req.last_log_term
						}));
					}
				}
			}
			Some(_) => {}
			None => {
				self.broadcast_append_entries(&mut out);
			}
		}

		out.next_tick = Some(HEARTBEAT_TIMEOUT);
		out
	}

	fn random_election_timeout() -> Duration {
		let (lo, hi) = ELECTION_TIMEOUT;
		let span = hi - lo;
		let jitter = if span == 0 { 0 } else { rand::thread_rng().next_u64() % span };
		Duration::from_millis(lo + jitter)
	}
}


#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashSet;

	fn single_node_module(id: ServerId) -> ConsensusModule {
		let mut members = HashSet::new();
		members.insert(id);
		let mut cm = ConsensusModule::new(id, Metadata::default(), Configuration::new(members), Arc::new(MemoryLog::new()));
		cm.become_leader();
		cm
	}

	#[test]
	fn single_node_commits_immediately() {
		let mut cm = single_node_module(1);
		let mut out = Tick::empty();
		let p = cm.propose_command(b"hello".to_vec(), &mut out).unwrap();
		assert_eq!(cm.proposal_status(p), ProposalStatus::Commited);
	}

	#[test]
	fn follower_rejects_proposals() {
		let mut members = HashSet::new();
		members.insert(1);
		members.insert(2);
		let mut cm = ConsensusModule::new(1, Metadata::default(), Configuration::new(members), Arc::new(MemoryLog::new()));
		let mut out = Tick::empty();
		let res = cm.propose_command(b"hello".to_vec(), &mut out);
		assert!(matches!(res, Err(ProposeError::NotLeader { .. })));
	}

	#[test]
	fn two_node_group_commits_once_follower_ack_reaches_quorum() {
		let mut members = HashSet::new();
		members.insert(1);
		members.insert(2);
		let mut cm = ConsensusModule::new(1, Metadata::default(), Configuration::new(members), Arc::new(MemoryLog::new()));
		cm.become_leader();

		let mut out = Tick::empty();
		let p = cm.propose_command(b"hello".to_vec(), &mut out).unwrap();

		// Before the follower has acked, a lone leader in a two-member group cannot
		// have reached quorum yet.
		assert_eq!(cm.proposal_status(p), ProposalStatus::Pending);

		cm.record_append_entries_response(2, AppendEntriesResponse { term: 0, success: true, last_log_index: Some(p.index) });

		assert_eq!(cm.proposal_status(p), ProposalStatus::Commited);
	}

	#[test]
	fn stale_term_append_entries_rejected() {
		let mut cm = single_node_module(1);
		let mut out = Tick::empty();
		let resp = cm.step_append_entries(AppendEntriesRequest {
			term: 0,
			leader_id: 2,
			prev_log_index: 0,
			prev_log_term: 0,
			entries: vec![],
			leader_commit: 0
		}, &mut out);
		assert!(!resp.success);
	}
}
