//! Wire marshaling plus the peer transport used to carry `AppendEntries`/`RequestVote`
//! between group members. Socket binding and connection management are explicitly out
//! of scope for this crate (see the spec it backs); what's here is just enough to let
//! `Node` exchange messages with real peers over HTTP using the same
//! `rmp_serde`/`hyper` combination the rest of this codebase uses for RPC payloads.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::errors::*;
use super::protos::*;

pub fn marshal<T: Serialize>(value: &T) -> Result<Vec<u8>> {
	Ok(rmps::to_vec(value)?)
}

pub fn unmarshal<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
	Ok(rmps::from_slice(data)?)
}


/// What a group member needs to be able to do to another member. Implementations may
/// be backed by real sockets (`HttpTransport`) or, for tests, by directly dispatching
/// into an in-process peer (`LocalTransport`).
pub trait Transport: Send + Sync {
	fn append_entries(&self, to: ServerId, req: AppendEntriesRequest) -> Result<AppendEntriesResponse>;

	fn request_vote(&self, to: ServerId, req: RequestVoteRequest) -> Result<RequestVoteResponse>;
}


/// Binds `addr` and dispatches incoming `/raft/append_entries` and `/raft/request_vote`
/// POSTs into `node`. Blocks the calling thread forever running the `tokio` 0.1
/// reactor; callers spawn this on its own thread. Connection and protocol-upgrade
/// handling beyond this are out of scope here — see `spec.md`'s Non-goals on process
/// lifecycle and socket plumbing.
pub fn serve(node: Arc<super::node::Node>, addr: &str) -> Result<()> {
	use futures::{Future, Stream};
	use hyper::service::service_fn;
	use hyper::{Body, Response, Server};

	let socket_addr = addr.parse().map_err(|_| Error::from("bad listen address"))?;

	let make_service = move || {
		let node = node.clone();
		service_fn(move |req: hyper::Request<Body>| -> Box<dyn Future<Item = Response<Body>, Error = hyper::Error> + Send> {
			let node = node.clone();
			let path = req.uri().path().to_string();

			Box::new(req.into_body().concat2().map(move |body| {
				let result = match path.as_str() {
					"/raft/append_entries" => unmarshal::<AppendEntriesRequest>(&body).map(|r| marshal(&node.step_append_entries(r))),
					"/raft/request_vote" => unmarshal::<RequestVoteRequest>(&body).map(|r| marshal(&node.step_request_vote(r))),
					_ => Err(Error::from("unknown raft rpc path"))
				};

				match result.and_then(|inner| inner) {
					Ok(bytes) => Response::new(Body::from(bytes)),
					Err(_) => {
						let mut resp = Response::new(Body::from("bad request"));
						*resp.status_mut() = hyper::StatusCode::BAD_REQUEST;
						resp
					}
				}
			}))
		})
	};

	let server = Server::bind(&socket_addr).serve(make_service).map_err(|_| ());
	hyper::rt::run(server);
	Ok(())
}


/// A `Transport` over plain HTTP POSTs of `rmp_serde`-encoded bodies, addressing peers
/// by their pre-configured base URL. One blocking request per call — good enough for
/// a group of a handful of replicas; nothing here tries to pipeline or multiplex.
pub struct HttpTransport {
	addresses: std::collections::HashMap<ServerId, String>,
	client: hyper::Client<hyper::client::HttpConnector>
}

impl HttpTransport {
	pub fn new(addresses: std::collections::HashMap<ServerId, String>) -> Self {
		HttpTransport { addresses, client: hyper::Client::new() }
	}

	fn post(&self, to: ServerId, path: &str, body: Vec<u8>) -> Result<Vec<u8>> {
		use futures::Stream;
		use futures::Future;

		let base = self.addresses.get(&to).ok_or_else(|| Error::from(format!("unknown peer {}", to)))?;
		let uri: hyper::Uri = format!("{}{}", base, path).parse().map_err(|_| Error::from("bad peer address"))?;

		let mut req = hyper::Request::new(hyper::Method::Post, uri);
		req.set_body(body);

		let resp = self.client.request(req).and_then(|res| res.body().concat2()).wait()?;
		Ok(resp.to_vec())
	}
}

impl Transport for HttpTransport {
	fn append_entries(&self, to: ServerId, req: AppendEntriesRequest) -> Result<AppendEntriesResponse> {
		let body = marshal(&req)?;
		let resp = self.post(to, "/raft/append_entries", body)?;
		unmarshal(&resp)
	}

	fn request_vote(&self, to: ServerId, req: RequestVoteRequest) -> Result<RequestVoteResponse> {
		let body = marshal(&req)?;
		let resp = self.post(to, "/raft/request_vote", body)?;
		unmarshal(&resp)
	}
}


/// A `Transport` that calls directly into another in-process `Node`, skipping the
/// network entirely. Used by `shardkv`'s own tests to exercise multi-replica
/// reconfiguration scenarios deterministically, matching the "test harness for
/// unreliability simulation is out of scope" Non-goal: we don't simulate drops here,
/// we just avoid needing real sockets for in-process tests.
pub struct LocalTransport {
	peers: std::sync::Mutex<std::collections::HashMap<ServerId, Arc<super::node::Node>>>
}

impl LocalTransport {
	pub fn new() -> Self {
		LocalTransport { peers: std::sync::Mutex::new(std::collections::HashMap::new()) }
	}

	pub fn register(&self, id: ServerId, node: Arc<super::node::Node>) {
		self.peers.lock().unwrap().insert(id, node);
	}
}

impl Transport for LocalTransport {
	fn append_entries(&self, to: ServerId, req: AppendEntriesRequest) -> Result<AppendEntriesResponse> {
		let peers = self.peers.lock().unwrap();
		let node = peers.get(&to).ok_or_else(|| Error::from(format!("unknown peer {}", to)))?;
		Ok(node.step_append_entries(req))
	}

	fn request_vote(&self, to: ServerId, req: RequestVoteRequest) -> Result<RequestVoteResponse> {
		let peers = self.peers.lock().unwrap();
		let node = peers.get(&to).ok_or_else(|| Error::from(format!("unknown peer {}", to)))?;
		Ok(node.step_request_vote(req))
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn marshal_roundtrip() {
		let req = RequestVoteRequest { term: 4, candidate_id: 2, last_log_index: 10, last_log_term: 3 };
		let bytes = marshal(&req).unwrap();
		let back: RequestVoteRequest = unmarshal(&bytes).unwrap();
		assert_eq!(back.term, 4);
		assert_eq!(back.candidate_id, 2);
	}
}
