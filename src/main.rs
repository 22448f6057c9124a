use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing::{error, info, warn};

use rust_chord::config::{parse_endpoint, Bootstrap, Cli, Command, Config, LookupArgs, ServeArgs};
use rust_chord::endpoints::{self, HttpTransport};
use rust_chord::logging;
use rust_chord::rpc::Remote;
use rust_chord::stabilizer;
use rust_chord::{ChordError, ChordNode, PeerRef, Result};

const JOIN_ATTEMPTS: u32 = 5;

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level);

    let outcome = match cli.command {
        Command::Serve(args) => serve(args),
        Command::Lookup(args) => lookup(args),
    };
    if let Err(e) = outcome {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn serve(args: ServeArgs) -> Result<()> {
    let config = args.into_config()?;
    let me = config.self_peer();
    info!("starting peer {} (bind {}:{})", me, config.bind_address, config.port);

    let transport = Arc::new(HttpTransport::new(config.rpc_timeout())?);
    let node = Arc::new(ChordNode::new(me, transport));

    stabilizer::spawn_maintenance(node.clone(), &config)?;
    spawn_bootstrap(node.clone(), &config)?;

    let server = endpoints::build_rocket(node, &config);
    rocket::execute(server.launch()).map_err(|e| ChordError::Endpoint(e.to_string()))?;
    Ok(())
}

/// Create or join in the background so the RPC server is already up when
/// other peers start talking to us. A failed join is retried a few times,
/// then left to an explicit `join` RPC.
fn spawn_bootstrap(node: Arc<ChordNode>, config: &Config) -> Result<()> {
    let bootstrap = config.bootstrap.clone();
    let backoff = config.stabilize_interval();
    thread::Builder::new()
        .name("bootstrap".to_string())
        .spawn(move || match bootstrap {
            Bootstrap::Wait => info!("waiting for a create or join request"),
            Bootstrap::Create => {
                if let Err(e) = node.create() {
                    error!("create failed: {}", e);
                }
            }
            Bootstrap::Join { address, port } => {
                // the real id is learned from the first answer
                let contact = PeerRef::new(address, port, 0);
                for attempt in 1..=JOIN_ATTEMPTS {
                    match join_via(&node, &contact) {
                        Ok(()) => return,
                        Err(e) => warn!("join attempt {}/{} failed: {}", attempt, JOIN_ATTEMPTS, e),
                    }
                    thread::sleep(backoff * attempt);
                }
                error!("giving up joining via {}", contact.endpoint());
            }
        })?;
    Ok(())
}

fn join_via(node: &ChordNode, contact: &PeerRef) -> Result<()> {
    let bootstrap = node.remote(contact).get_info()?;
    node.join(&bootstrap)
}

fn lookup(args: LookupArgs) -> Result<()> {
    let (address, port) = parse_endpoint(&args.peer)?;
    let transport = HttpTransport::new(Duration::from_millis(args.timeout_ms))?;

    let contact = PeerRef::new(address, port, 0);
    let peer = Remote::new(&transport, &contact).get_info()?;
    if !transport.topology(&peer)?.joined {
        return Err(ChordError::NotJoined);
    }

    let id = args.target_id();
    let owner = Remote::new(&transport, &peer).find_successor(id)?;
    let answer = json!({
        "id": id,
        "key": args.key,
        "asked": peer,
        "owner": owner,
    });
    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}
