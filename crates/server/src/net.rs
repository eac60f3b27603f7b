//! TCP front end: newline-delimited JSON over persistent connections.
//!
//! The accept loop hands each connection its own task; requests on one
//! connection are handled strictly in arrival order, while distinct
//! connections race into the executor's global FIFO. A line that does not
//! parse is answered with a parse error (id 0) and the connection stays open.

use std::net::SocketAddr;

use armature_proto::{ErrorCode, RequestId, Request, Response, WireError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use armature_engine::Dispatcher;

/// Binds `addr` and serves until `shutdown` is cancelled.
///
/// Cancellation stops accepting new connections; established connections and
/// queued executor work are left to finish on their own.
///
/// # Errors
///
/// Returns an error when the listen address cannot be bound.
pub async fn serve<H: Send + 'static>(
	addr: SocketAddr,
	dispatcher: Dispatcher<H>,
	shutdown: CancellationToken,
) -> std::io::Result<()> {
	let listener = TcpListener::bind(addr).await?;
	tracing::info!(addr = %listener.local_addr()?, "armature server listening");

	loop {
		tokio::select! {
			_ = shutdown.cancelled() => {
				tracing::info!("armature server shutting down");
				break;
			}
			accepted = listener.accept() => {
				match accepted {
					Ok((stream, peer)) => {
						tracing::info!(peer = %peer, "client connected");
						let dispatcher = dispatcher.clone();
						tokio::spawn(async move {
							handle_connection(stream, dispatcher).await;
							tracing::info!(peer = %peer, "client disconnected");
						});
					}
					Err(err) => {
						tracing::error!(error = %err, "failed to accept connection");
					}
				}
			}
		}
	}

	Ok(())
}

/// Serves one connection until EOF or a write failure.
pub(crate) async fn handle_connection<S, H>(stream: S, dispatcher: Dispatcher<H>)
where
	S: AsyncRead + AsyncWrite + Send + Unpin,
	H: Send + 'static,
{
	let (reader, mut writer) = tokio::io::split(stream);
	let mut lines = BufReader::new(reader).lines();

	loop {
		let line = match lines.next_line().await {
			Ok(Some(line)) => line,
			Ok(None) => break,
			Err(err) => {
				tracing::debug!(error = %err, "connection read failed");
				break;
			}
		};
		if line.trim().is_empty() {
			continue;
		}

		let response = match serde_json::from_str::<Request>(&line) {
			Ok(request) => dispatcher.dispatch(request).await,
			Err(err) => {
				tracing::debug!(error = %err, "unparseable request line");
				// No correlation id is recoverable from a broken line.
				Response::err(
					RequestId(0),
					WireError {
						code: ErrorCode::ParseError,
						message: format!("invalid request: {err}"),
						data: None,
					},
				)
			}
		};

		let mut payload = match serde_json::to_vec(&response) {
			Ok(payload) => payload,
			Err(err) => {
				tracing::error!(error = %err, "failed to encode response");
				continue;
			}
		};
		payload.push(b'\n');
		if writer.write_all(&payload).await.is_err() {
			break;
		}
		if writer.flush().await.is_err() {
			break;
		}
	}
}

#[cfg(test)]
mod tests {
	use armature_engine::{EngineConfig, Executor, RevisionTracker};
	use serde_json::{Value, json};
	use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

	use super::*;
	use crate::handlers;
	use crate::model::Document;

	struct Client {
		reader: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
		writer: WriteHalf<DuplexStream>,
	}

	impl Client {
		async fn send(&mut self, line: &str) {
			self.writer.write_all(line.as_bytes()).await.unwrap();
			self.writer.write_all(b"\n").await.unwrap();
		}

		async fn recv(&mut self) -> Value {
			let line = self.reader.next_line().await.unwrap().unwrap();
			serde_json::from_str(&line).unwrap()
		}
	}

	fn connect() -> (Client, tokio::task::JoinHandle<()>) {
		let revisions = RevisionTracker::new();
		let config = EngineConfig::default();
		let executor = Executor::spawn(
			Document::new("NetTest"),
			revisions.clone(),
			&config,
			CancellationToken::new(),
		);
		let dispatcher = Dispatcher::new(handlers::registry(), executor, revisions, config);

		let (client_side, server_side) = tokio::io::duplex(4096);
		let server = tokio::spawn(async move { handle_connection(server_side, dispatcher).await });

		let (reader, writer) = tokio::io::split(client_side);
		let client = Client {
			reader: BufReader::new(reader).lines(),
			writer,
		};
		(client, server)
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn request_lines_are_answered_in_order() {
		let (mut client, _server) = connect();

		client.send(r#"{"id": 1, "method": "sketch.create", "params": {"plane_reference": "XY"}}"#).await;
		client.send(r#"{"id": 2, "method": "sketch.list"}"#).await;

		let created = client.recv().await;
		assert_eq!(created["id"], 1);
		assert_eq!(created["result"]["sketch_id"], "sketch-1");

		let listed = client.recv().await;
		assert_eq!(listed["id"], 2);
		assert_eq!(listed["result"]["count"], 1);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn malformed_line_gets_parse_error_and_connection_survives() {
		let (mut client, _server) = connect();

		client.send("{not json").await;
		let error = client.recv().await;
		assert_eq!(error["id"], 0);
		assert_eq!(error["error"]["code"], -32700);

		// The connection is still serviceable afterwards.
		client.send(r#"{"id": 7, "method": "document.get_info"}"#).await;
		let info = client.recv().await;
		assert_eq!(info["id"], 7);
		assert_eq!(info["result"]["document_name"], "NetTest");
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn unknown_method_is_an_error_response() {
		let (mut client, _server) = connect();

		client.send(r#"{"id": 3, "method": "fusion.extrude"}"#).await;
		let response = client.recv().await;
		assert_eq!(response["id"], 3);
		assert_eq!(response["error"]["code"], -32601);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn disconnect_ends_the_connection_task_cleanly() {
		let (client, server) = connect();
		drop(client);
		server.await.expect("connection task panicked");
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn transaction_over_the_wire_rolls_back() {
		let (mut client, _server) = connect();

		client.send(r#"{"id": 1, "method": "sketch.create", "params": {"plane_reference": "XY"}}"#).await;
		let created = client.recv().await;
		let sketch_id = created["result"]["sketch_id"].as_str().unwrap().to_string();

		let txn = json!({
			"id": 2,
			"method": "transaction.run",
			"params": {
				"resource": sketch_id.clone(),
				"steps": [
					{"method": "sketch.add_line", "params": {
						"sketch_id": sketch_id.clone(),
						"start_point": {"x": 0.0, "y": 0.0},
						"end_point": {"x": 10.0, "y": 0.0},
					}},
					{"method": "sketch.add_circle", "params": {
						"sketch_id": sketch_id.clone(),
						"center": {"x": 0.0, "y": 0.0},
						"radius": -1.0,
					}},
				],
			},
		});
		client.send(&txn.to_string()).await;

		let response = client.recv().await;
		assert_eq!(response["id"], 2);
		assert_eq!(response["error"]["code"], -32003);
		assert_eq!(response["error"]["data"]["rolled_back"], true);

		// The sketch is empty again.
		client
			.send(&json!({"id": 3, "method": "sketch.get_info", "params": {"sketch_id": sketch_id}}).to_string())
			.await;
		let info = client.recv().await;
		assert_eq!(info["result"]["entity_count"], 0);
	}
}
