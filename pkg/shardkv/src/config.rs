//! Process-level configuration: a TOML file describing this replica's static identity
//! (group id, this node's raft peers, the shard master's address), overridable from
//! the command line the way `haystack`'s `main.rs` layers `clap` over a config file.

use std::fs::File;
use std::io::Read;

use clap::{App, Arg};

use super::errors::*;
use super::op::GroupId;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
	/// This replica's raft peer id, unique within its group.
	pub node_id: u64,
	/// The replica group this process belongs to.
	pub group_id: GroupId,
	/// `node_id -> listen address` for every member of this replica's raft group.
	pub peers: std::collections::HashMap<u64, String>,
	/// Address this process listens on for client and peer-group RPCs.
	pub listen_addr: String,
	/// Address of the external shard master this replica polls on every tick.
	pub master_addr: String
}

impl ServerConfig {
	pub fn load(path: &str) -> Result<ServerConfig> {
		let mut contents = String::new();
		File::open(path)?.read_to_string(&mut contents)?;
		toml::from_str(&contents).map_err(|e| Error::from(format!("invalid config file {}: {}", path, e)))
	}
}

/// Parses `--config <path>`, the only flag this binary needs — everything else about
/// a replica's identity lives in the file itself, since a group's peer list isn't
/// something you want to be able to typo on the command line.
pub fn parse_args() -> Result<ServerConfig> {
	let matches = App::new("shardkv-server")
		.about("One replica of one group in a sharded, replicated key-value store")
		.arg(Arg::with_name("config")
			.short("c")
			.long("config")
			.value_name("CONFIG_FILE")
			.help("Path to this replica's TOML config file")
			.takes_value(true)
			.required(true))
		.get_matches();

	let path = matches.value_of("config").unwrap();
	ServerConfig::load(path)
}
