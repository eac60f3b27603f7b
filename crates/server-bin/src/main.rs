//! armature binary.
//!
//! Binds the TCP listener, spawns the executor that owns the model document,
//! and serves until ctrl-c. Shutdown cancels the token: the accept loop stops,
//! then the executor drains whatever was already queued.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use armature_engine::{Dispatcher, EngineConfig, Executor, RevisionTracker};
use armature_server::{Document, document_resource, handlers};

/// armature command line arguments.
#[derive(Parser, Debug)]
#[command(name = "armature")]
#[command(about = "Concurrent TCP bridge for a single-threaded parametric CAD host")]
struct Args {
	/// Address to listen on
	#[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
	bind: IpAddr,

	/// Port to listen on
	#[arg(short, long, default_value_t = 8765)]
	port: u16,

	/// Maximum queued work items before submissions are rejected
	#[arg(long, default_value_t = 64)]
	queue_depth: usize,

	/// Completion ceiling per operation, in seconds
	#[arg(long, default_value_t = 30)]
	timeout_secs: u64,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	let subscriber = tracing_subscriber::fmt()
		.with_max_level(if args.verbose {
			tracing::Level::DEBUG
		} else {
			tracing::Level::INFO
		})
		.finish();
	tracing::subscriber::set_global_default(subscriber)?;

	info!("starting armature");

	let config = EngineConfig {
		queue_depth: args.queue_depth,
		wait_timeout: Duration::from_secs(args.timeout_secs),
		step_timeout: Duration::from_secs(args.timeout_secs),
		..EngineConfig::default()
	};

	let revisions = RevisionTracker::new();
	revisions.register(&document_resource());

	let shutdown = CancellationToken::new();
	let executor = Executor::spawn(
		Document::new("Untitled"),
		revisions.clone(),
		&config,
		shutdown.clone(),
	);
	let dispatcher = Dispatcher::new(handlers::registry(), executor, revisions, config);

	let addr = SocketAddr::new(args.bind, args.port);
	let server = tokio::spawn(armature_server::serve(addr, dispatcher, shutdown.clone()));

	tokio::signal::ctrl_c().await?;
	info!("ctrl-c received; shutting down");
	shutdown.cancel();

	server.await??;
	Ok(())
}
