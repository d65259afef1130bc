//! Vela node binary.
//!
//! Loads `vela.toml` from the data directory, restores or generates the
//! spend key, assembles the consensus core, and runs the dispatcher until
//! interrupted. The peer transport is expected to be attached by the
//! embedding deployment; standalone, the binary keeps consensus state warm
//! and serves as a harness for operating the core.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use vela::clock::SystemClock;
use vela::config::VelaConfig;
use vela::consensus::committee::CommitteeMember;
use vela::crypto::keys::Keypair;
use vela::network::{NetworkError, Peer, PeerId};
use vela::node::storage::{SledStore, Store};
use vela::node::{Node, NodeInit};
use vela::transaction::PassthroughValidator;

/// Vela DAG ledger consensus node.
#[derive(Parser, Debug)]
#[command(name = "vela", version, about = "Vela DAG ledger consensus node")]
struct Cli {
    /// Data directory for persistent storage and configuration.
    #[arg(long, default_value = "./vela-data")]
    data_dir: PathBuf,

    /// Epoch timestamp (nanoseconds) for bootstrapping a fresh graph.
    #[arg(long)]
    epoch: Option<u64>,
}

/// Placeholder transport: logs outbound messages until a real peer layer is
/// attached.
struct NullPeer;

#[async_trait::async_trait]
impl Peer for NullPeer {
    async fn send_announcement(
        &self,
        to: PeerId,
        _snapshot: &vela::consensus::snapshot::Snapshot,
    ) -> Result<(), NetworkError> {
        tracing::debug!(to = %hex::encode(&to[..8]), "announcement not delivered: no transport");
        Ok(())
    }

    async fn send_commitment(
        &self,
        to: PeerId,
        _snapshot_hash: vela::Hash,
        _commitment: vela::crypto::cosi::Commitment,
        _want_tx: bool,
    ) -> Result<(), NetworkError> {
        tracing::debug!(to = %hex::encode(&to[..8]), "commitment not delivered: no transport");
        Ok(())
    }

    async fn send_challenge(
        &self,
        to: PeerId,
        _snapshot_hash: vela::Hash,
        _signature: vela::crypto::cosi::CosiSignature,
        _transaction: Option<vela::transaction::VersionedTransaction>,
    ) -> Result<(), NetworkError> {
        tracing::debug!(to = %hex::encode(&to[..8]), "challenge not delivered: no transport");
        Ok(())
    }

    async fn send_response(
        &self,
        to: PeerId,
        _snapshot_hash: vela::Hash,
        _response: [u8; 32],
    ) -> Result<(), NetworkError> {
        tracing::debug!(to = %hex::encode(&to[..8]), "response not delivered: no transport");
        Ok(())
    }

    async fn send_finalization(
        &self,
        to: PeerId,
        _snapshot: &vela::consensus::snapshot::Snapshot,
    ) -> Result<(), NetworkError> {
        tracing::debug!(to = %hex::encode(&to[..8]), "finalization not delivered: no transport");
        Ok(())
    }

    async fn send_confirm(&self, to: PeerId, _snapshot_hash: vela::Hash) -> Result<(), NetworkError> {
        tracing::debug!(to = %hex::encode(&to[..8]), "confirm not delivered: no transport");
        Ok(())
    }
}

/// Load the spend key from `spend.key`, generating one on first run.
fn load_or_generate_keypair(data_dir: &Path) -> std::io::Result<Keypair> {
    let key_path = data_dir.join("spend.key");
    if key_path.exists() {
        let bytes = std::fs::read(&key_path)?;
        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "spend key file corrupted")
        })?;
        let keypair = Keypair::from_secret_bytes(bytes).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "spend key not canonical")
        })?;
        tracing::info!(key = %hex::encode(&keypair.public.fingerprint()[..8]), "Loaded spend key");
        Ok(keypair)
    } else {
        std::fs::create_dir_all(data_dir)?;
        let keypair = Keypair::generate();
        std::fs::write(&key_path, keypair.secret_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
        }
        tracing::info!(key = %hex::encode(&keypair.public.fingerprint()[..8]), "Generated spend key");
        Ok(keypair)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sled=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = VelaConfig::load(&cli.data_dir);
    let keypair = load_or_generate_keypair(&cli.data_dir)?;
    let clock = Arc::new(SystemClock);
    let store = Arc::new(SledStore::open(&cli.data_dir.join("consensus"))?);

    // Committee: storage if populated, otherwise ourselves alone; a fresh
    // deployment needs acceptance snapshots (or a seeded store) to grow.
    let mut committee = store.read_committee()?;
    if committee.is_empty() {
        committee = vec![CommitteeMember {
            node_id: keypair.public.fingerprint(),
            signer: keypair.public,
            accepted_at: 0,
        }];
    }
    if committee.len() < 2 {
        tracing::warn!(
            "committee has {} member(s); consensus needs at least 2 chains to run",
            committee.len()
        );
        return Ok(());
    }

    let epoch = cli.epoch.unwrap_or_else(|| {
        use vela::clock::Clock;
        SystemClock.now_nanos()
    });
    let (node, dispatcher) = Node::new(NodeInit {
        keypair,
        consensus: config.consensus.clone(),
        committee,
        epoch,
        clock,
        store,
        peer: Arc::new(NullPeer),
        tx_validator: Arc::new(PassthroughValidator),
    })?;
    tracing::info!(
        node = %hex::encode(&node.node_id[..8]),
        round_gap_ms = config.consensus.round_gap / 1_000_000,
        "consensus core ready"
    );

    let shutdown: CancellationToken = dispatcher.shutdown_token();
    let dispatcher_task = tokio::spawn(dispatcher.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    shutdown.cancel();
    dispatcher_task.await?;
    Ok(())
}
