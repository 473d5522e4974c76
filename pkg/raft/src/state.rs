use std::collections::HashMap;
use std::time::Instant;

use super::protos::*;

/// Per-follower replication bookkeeping kept by the leader only.
#[derive(Debug, Clone)]
pub struct FollowerProgress {
	/// Index of the next log entry to send to this server.
	pub next_index: LogIndex,

	/// Index of the highest log entry known to be replicated on this server.
	pub match_index: LogIndex,

	pub last_heartbeat_ack: Option<Instant>
}

impl FollowerProgress {
	fn new(next_index: LogIndex) -> Self {
		FollowerProgress { next_index, match_index: 0, last_heartbeat_ack: None }
	}
}

#[derive(Debug, Clone)]
pub struct LeaderState {
	pub progress: HashMap<ServerId, FollowerProgress>
}

#[derive(Debug, Clone)]
pub struct CandidateState {
	pub votes_received: std::collections::HashSet<ServerId>
}

/// The volatile role of a single raft server. Every transition resets the election
/// deadline; `ConsensusModule` is the only thing allowed to move a server between
/// these states.
#[derive(Debug, Clone)]
pub enum ServerState {
	Follower { election_deadline: Instant },
	Candidate { election_deadline: Instant, state: CandidateState },
	Leader(LeaderState)
}

impl ServerState {
	pub fn new_follower(now: Instant) -> Self {
		ServerState::Follower { election_deadline: now }
	}

	pub fn new_candidate(now: Instant) -> Self {
		ServerState::Candidate {
			election_deadline: now,
			state: CandidateState { votes_received: std::collections::HashSet::new() }
		}
	}

	pub fn new_leader(members: impl Iterator<Item=ServerId>, next_index: LogIndex) -> Self {
		let mut progress = HashMap::new();
		for id in members {
			progress.insert(id, FollowerProgress::new(next_index));
		}
		ServerState::Leader(LeaderState { progress })
	}

	pub fn is_leader(&self) -> bool {
		matches!(self, ServerState::Leader(_))
	}
}
