use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use log::info;
use redphone_rust::config::CallConfig;
use redphone_rust::rpcore::store::{IdentityStore, RetainedSecretsStore};
use redphone_rust::rpcore::types::Zid;
use redphone_rust::rpcore::zrtp::{KeyAgreementType, Role};
use redphone_rust::store::{FileStore, MemoryStore};
use redphone_rust::terminator::Terminator;
use redphone_rust::transport::UdpTransport;
use redphone_rust::zrtp::{SecureCall, ZrtpSocket};
use redphone_rust::Continuity;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Runs a full ZRTP handshake between two local endpoints over UDP.
//
// Usage:
//   cargo run -- loopback                        # EC25, secrets kept in memory
//   cargo run -- loopback --dh3k                 # Offer only DH3K
//   cargo run -- loopback --data-dir ./calls     # Persist ZIDs and retained secrets
//
// Running twice with the same --data-dir shows retained-secret continuity.

#[derive(Parser)]
#[command(name = "redphone", about = "ZRTP secure call handshake tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Negotiate a call between two endpoints on 127.0.0.1 and print both SAS.
    Loopback {
        /// Offer only finite-field DH3K instead of EC25.
        #[arg(long)]
        dh3k: bool,
        /// Keep each endpoint's ZID and retained secrets under this directory.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

struct Endpoint {
    name: &'static str,
    number: &'static str,
    zid: Zid,
    store: Arc<dyn RetainedSecretsStore>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(async {
        match cli.command {
            Command::Loopback { dh3k, data_dir } => loopback(dh3k, data_dir.as_deref()).await,
        }
    })
}

async fn loopback(dh3k: bool, data_dir: Option<&Path>) -> anyhow::Result<()> {
    let alice = open_endpoint("alice", "+14155550100", data_dir).await?;
    let bob = open_endpoint("bob", "+14155550199", data_dir).await?;

    let alice_transport = UdpTransport::bind("127.0.0.1:0").await?;
    let bob_transport = UdpTransport::bind("127.0.0.1:0").await?;
    alice_transport
        .connect(&bob_transport.local_addr()?.to_string())
        .await?;
    bob_transport
        .connect(&alice_transport.local_addr()?.to_string())
        .await?;

    let mut config = CallConfig::default();
    if dh3k {
        config.handshake.key_agreements = vec![KeyAgreementType::Dh3k];
    }

    let (terminator, termination) = Terminator::new();
    let initiator = ZrtpSocket::new(
        Role::Initiator,
        alice.zid,
        config.clone(),
        Arc::new(alice_transport),
        alice.store.clone(),
        bob.number,
        termination.clone(),
    );
    let responder = ZrtpSocket::new(
        Role::Responder,
        bob.zid,
        config,
        Arc::new(bob_transport),
        bob.store.clone(),
        alice.number,
        termination,
    );

    let negotiated = tokio::select! {
        result = async { tokio::try_join!(initiator.negotiate(), responder.negotiate()) } => result,
        _ = tokio::signal::ctrl_c() => {
            terminator.terminate();
            anyhow::bail!("interrupted");
        }
    };
    let (alice_call, bob_call) = negotiated.context("handshake failed")?;

    report(&alice, &alice_call);
    report(&bob, &bob_call);
    if alice_call.outcome.sas != bob_call.outcome.sas {
        anyhow::bail!("endpoints derived different SAS values");
    }
    Ok(())
}

async fn open_endpoint(
    name: &'static str,
    number: &'static str,
    data_dir: Option<&Path>,
) -> anyhow::Result<Endpoint> {
    let (store, identity): (Arc<dyn RetainedSecretsStore>, Arc<dyn IdentityStore>) =
        match data_dir {
            Some(dir) => {
                let store = Arc::new(
                    FileStore::new(dir.join(name))
                        .await
                        .with_context(|| format!("failed to open store for {}", name))?,
                );
                let retained: Arc<dyn RetainedSecretsStore> = store.clone();
                let identity: Arc<dyn IdentityStore> = store;
                (retained, identity)
            }
            None => {
                let store = Arc::new(MemoryStore::new());
                let retained: Arc<dyn RetainedSecretsStore> = store.clone();
                let identity: Arc<dyn IdentityStore> = store;
                (retained, identity)
            }
        };

    let zid = match identity.load_zid().await? {
        Some(zid) => zid,
        None => {
            let zid = Zid::generate();
            identity.store_zid(&zid).await?;
            zid
        }
    };
    info!("{} is {} with ZID {}", name, number, zid);

    Ok(Endpoint {
        name,
        number,
        zid,
        store,
    })
}

fn report(endpoint: &Endpoint, call: &SecureCall) {
    let outcome = &call.outcome;
    let continuity = Continuity::new(
        outcome.had_retained_secrets,
        outcome.continuity,
        call.locally_verified && outcome.peer_sas_verified,
    );
    println!(
        "{:<6} SAS {}  key agreement {}  peer {}  continuity {:?}",
        endpoint.name, outcome.sas, outcome.key_agreement, outcome.peer_zid, continuity
    );
}
