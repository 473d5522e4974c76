use std::collections::HashSet;

/*
	NOTE: When two servers first connect to each other, they should exchange cluster ids to validate that both of them are operating in the same namespace of server ids

	Types of servers in the cluster:
	- Voting members : these are the only ones considered for the purposes of counting votes and commit quorums
	- Learners : not used by this crate (shardkv's groups are statically configured by the shard master)

	TODO: Next step would be to ensure that the main Raft module tries to stay at near zero allocations for state transitions
*/

/// Type used to uniquely identify each server. These are assigned automatically and increment monotonically starting with the first server having an id of 1 and will never repeat with new servers
pub type ServerId = u64;

pub type Term = u64;

pub type LogIndex = u64;


/// Identifies a single entry in the log by the term that created it plus its index.
/// Two proposals observed with equal `(term, index)` refer to the exact same log slot.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPosition {
	pub term: Term,
	pub index: LogIndex
}


/// Persistent information describing the state of the current server
#[derive(Serialize, Deserialize, Clone)]
pub struct Metadata {

	/// Latest term seen by this server (starts at 0)
	pub current_term: Term,

	/// The id of the server that we have voted for in the current term
	pub voted_for: Option<ServerId>,

	/// Index of the last log entry safely replicated on a majority of servers and at same point commited in the same term
	/// NOTE: There is no invariant between the local machines commit_index and it's match_index. The commit_index can sometimes be higher than the match_index in the case that a majority of other servers have a match_index >= commit_index
	pub commit_index: LogIndex
}

impl Default for Metadata {
	fn default() -> Self {
		Metadata {
			current_term: 0,
			voted_for: None,
			commit_index: 0
		}
	}
}


/// The fixed membership of a single replica group. Unlike the teacher's original
/// `ConfigurationStateMachine`, this is a plain, statically-assigned set: shardkv
/// groups never grow or shrink their own raft membership (the shard *master* moves
/// shards between whole groups instead), so there is no joint-consensus machinery here.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Configuration {
	/// All servers in the cluster which must be considered for votes
	pub members: HashSet<ServerId>
}

impl Default for Configuration {
	fn default() -> Self {
		Configuration { members: HashSet::new() }
	}
}

impl Configuration {
	pub fn new(members: HashSet<ServerId>) -> Self {
		Configuration { members }
	}

	pub fn iter(&self) -> impl Iterator<Item=&ServerId> {
		self.members.iter()
	}

	pub fn quorum_size(&self) -> usize {
		(self.members.len() / 2) + 1
	}
}


/// Opaque payload proposed onto the log. `shardkv` never sees this type directly: it
/// only proposes `Vec<u8>` (a `rmp_serde`-encoded `shardkv::op::Op`) via
/// `propose_command` and gets back the bytes it proposed once `catchUp` replays the
/// slot.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum LogEntryData {
	/// Does nothing but occupies a single log index. Used by a freshly-elected leader
	/// to commit a no-op so that it can tell which of its predecessor's entries are
	/// safely committed (the "last term" trick from the Raft paper, §8).
	Noop,

	/// Represents some opaque data to be executed on the state machine.
	Command(Vec<u8>)
}

/// The format of a single log entry that will be appended to every server's append-only log
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LogEntry {
	pub index: LogIndex,
	pub term: Term,
	pub data: LogEntryData
}


#[derive(Serialize, Deserialize, Debug)]
pub struct AppendEntriesRequest {
	pub term: Term,
	pub leader_id: ServerId,
	pub prev_log_index: LogIndex,
	pub prev_log_term: Term,
	pub entries: Vec<LogEntry>,
	pub leader_commit: LogIndex
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AppendEntriesResponse {
	pub term: Term,
	pub success: bool,

	/// An addition on top of the paper so the leader knows what it needs to replicate to this server
	pub last_log_index: Option<LogIndex>
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RequestVoteRequest {
	pub term: Term,
	pub candidate_id: ServerId,
	pub last_log_index: LogIndex,
	pub last_log_term: Term
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RequestVoteResponse {
	pub term: Term,
	pub vote_granted: bool
}


/// Asks the server to propose a single entry to the state machine
#[derive(Serialize, Deserialize, Debug)]
pub struct ProposeRequest {
	pub data: LogEntryData
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ProposeResponse {
	pub term: Term,
	pub index: LogIndex
}
