#[macro_use] extern crate serde_derive;
#[macro_use] extern crate error_chain;

extern crate futures;
extern crate rand;
extern crate serde;
extern crate rmp_serde as rmps;
extern crate hyper;


pub mod errors {
	error_chain! {
		foreign_links {
			Io(::std::io::Error);
			HTTP(hyper::Error);
			Encode(::rmps::encode::Error);
			Decode(::rmps::decode::Error);
		}
	}
}

pub mod protos; // TODO: Eventually make this private again
pub mod rpc;

pub mod log; // XXX: Likewise should be private
mod state;
pub mod consensus;
pub mod node;
