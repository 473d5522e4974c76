#[macro_use] extern crate serde_derive;
#[macro_use] extern crate error_chain;

extern crate raft;
extern crate serde;
extern crate rmp_serde as rmps;
extern crate hyper;
extern crate futures;
extern crate siphasher;
extern crate tracing;
extern crate clap;
extern crate toml;

#[cfg(test)]
extern crate tempfile;

pub mod errors {
	error_chain! {
		foreign_links {
			Io(::std::io::Error);
			Encode(::rmps::encode::Error);
			Decode(::rmps::decode::Error);
		}
	}
}

pub mod shardmaster;
pub mod op;
pub mod state_machine;
pub mod log_driver;
pub mod handlers;
pub mod reconfig;
pub mod transfer;
pub mod rpc_shim;
pub mod server;
pub mod config;

#[cfg(test)]
mod tests;
