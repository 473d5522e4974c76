//! Wire marshaling and the thin HTTP transport for this crate's own RPCs (`Get`,
//! `PutAppend`, `TransferState`), following the same `rmp_serde` + `hyper` combination
//! `raft::rpc` uses for the consensus substrate's wire format. Socket binding itself
//! stays minimal — per `spec.md` §1, "process lifecycle, socket plumbing" is explicitly
//! out of scope; `server.rs` does only as much as needed to dispatch an incoming
//! request to `Replica`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::errors::*;

pub fn marshal<T: Serialize>(value: &T) -> Result<Vec<u8>> {
	Ok(rmps::to_vec(value)?)
}

pub fn unmarshal<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
	Ok(rmps::from_slice(data)?)
}

/// Request envelopes for the three RPCs in §6. Kept as plain tagged enums so one
/// `hyper` endpoint (`/shardkv/rpc`) can dispatch all of them, the same way
/// `raft::rpc` tags `AppendEntries`/`RequestVote` by path rather than by a separate
/// listener per RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
	Get { cid: String, seq: u64, key: Vec<u8> },
	PutAppend { cid: String, seq: u64, kind: super::op::PutAppendKind, key: Vec<u8>, value: Vec<u8> },
	TransferState { config_num: u64, shard: usize }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
	KvReply(super::op::Reply),
	Transfer { err: super::op::Err, state: super::op::ExtState }
}

/// Binds `addr` and dispatches incoming `/shardkv/rpc` POSTs into `replica`. Mirrors
/// `raft::rpc::serve`'s shape; blocks the calling thread running the `tokio` 0.1
/// reactor. Process lifecycle beyond accepting connections (graceful shutdown,
/// TLS, ...) is out of scope per `spec.md`'s Non-goals.
pub fn serve(replica: std::sync::Arc<super::server::Replica>, addr: &str) -> Result<()> {
	use futures::{Future, Stream};
	use hyper::service::service_fn;
	use hyper::{Body, Response, Server};

	let socket_addr = addr.parse().map_err(|_| Error::from("bad listen address"))?;

	let make_service = move || {
		let replica = replica.clone();
		service_fn(move |req: hyper::Request<Body>| -> Box<dyn Future<Item = Response<Body>, Error = hyper::Error> + Send> {
			let replica = replica.clone();

			Box::new(req.into_body().concat2().map(move |body| {
				let parsed = unmarshal::<Request>(&body).ok();
				let response = parsed.and_then(|parsed| dispatch(&replica, parsed));

				match response.map(|r| marshal(&r)) {
					Some(Ok(bytes)) => Response::new(Body::from(bytes)),
					Some(Err(_)) => {
						let mut resp = Response::new(Body::from("encode error"));
						*resp.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
						resp
					}
					None => {
						// Either a malformed request, or this replica isn't the
						// leader right now (`dispatch` returns `None` for both —
						// neither is a valid `Response`, so `RpcClient::call`'s
						// `unmarshal` naturally surfaces this as a call failure,
						// per §7).
						let mut resp = Response::new(Body::from("not leader or bad request"));
						*resp.status_mut() = hyper::StatusCode::SERVICE_UNAVAILABLE;
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

/// `None` means the handler could not log the request because this replica isn't the
/// leader of its group right now — not a `Response` value, since `Get`/`PutAppend`'s
/// closed reply sets (§6) have no code for that; the caller in `serve` turns it into a
/// non-2xx HTTP response instead.
fn dispatch(replica: &super::server::Replica, req: Request) -> Option<Response> {
	match req {
		Request::Get { cid, seq, key } => replica.get(cid, seq, key).ok().map(Response::KvReply),
		Request::PutAppend { cid, seq, kind, key, value } => replica.put_append(cid, seq, kind, key, value).ok().map(Response::KvReply),
		Request::TransferState { config_num, shard } => {
			let (err, state) = replica.transfer_state(config_num, shard);
			Some(Response::Transfer { err, state })
		}
	}
}

/// A peer-facing client stub: POSTs a marshaled `Request` to a replica's base URL and
/// decodes the `Response`. Transport failures (unreachable peer, timeout) are reported
/// as a plain `Err`, which `reconfig::request_shard` treats as a retryable
/// incompleteness signal per §4.6/§7 — never as one of the closed RPC error codes.
pub struct RpcClient {
	client: hyper::Client<hyper::client::HttpConnector>
}

impl RpcClient {
	pub fn new() -> Self {
		RpcClient { client: hyper::Client::new() }
	}

	pub fn call(&self, base_addr: &str, req: &Request) -> Result<Response> {
		use futures::{Future, Stream};

		let body = marshal(req)?;
		let uri: hyper::Uri = format!("{}/shardkv/rpc", base_addr).parse().map_err(|_| Error::from("bad replica address"))?;

		let mut http_req = hyper::Request::new(hyper::Method::Post, uri);
		http_req.set_body(body);

		let resp_bytes = self.client.request(http_req)
			.and_then(|res| res.body().concat2())
			.wait()
			.map_err(|e| Error::from(format!("rpc call failed: {}", e)))?;

		unmarshal(&resp_bytes)
	}
}
