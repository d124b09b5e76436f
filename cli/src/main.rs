// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # relic
//!
//! Operator front-end for the relic transfer and provenance library. Every
//! command opens the same sled database under the data directory, so a
//! sequence of invocations walks a transfer through its whole lifecycle:
//!
//! ```text
//! relic keygen alice && relic keygen bob
//! relic import art.png --owner alice --asset-id a1
//! relic transfer initiate a1 bob
//! relic transfer package <transfer-id> -o a1.relic.json
//! relic transfer complete <transfer-id>
//! relic transfer record <transfer-id>
//! relic open a1.relic.json --as bob -o art.png --import
//! relic certificate a1 --text
//! ```
//!
//! If a process dies mid-transfer, `relic transfer recover <transfer-id>`
//! fails the stuck session and `relic transfer reconcile` resolves it.
//!
//! Command output is JSON on stdout. Logs go to stderr.

mod cli;
mod keystore;
mod logging;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use relic_protocol::config::ProtocolConfig;
use relic_protocol::crypto::keys::RelicPublicKey;
use relic_protocol::crypto::provider::StandardCrypto;
use relic_protocol::crypto::sealing::DeliveryPublicKey;
use relic_protocol::ledger::LocalLedger;
use relic_protocol::provenance::{CertificateGenerator, ProvenanceLedger};
use relic_protocol::storage::{
    AssetMetadata, AssetStore, RelicDb, SledAssetStore, SledChainRepository, SledSessionRepository,
};
use relic_protocol::transfer::{SecureTransferPackage, TransferCoordinator};

use cli::{Commands, GlobalArgs, ImportArgs, OpenArgs, RelicCli, TransferCommand};
use keystore::KeyStore;
use logging::LogFormat;

/// Everything a command needs, wired over one database.
struct Relic {
    db: RelicDb,
    config: ProtocolConfig,
    store: Arc<SledAssetStore>,
    coordinator: TransferCoordinator,
    provenance: Arc<ProvenanceLedger>,
    keys: KeyStore,
}

impl Relic {
    fn open(global: &GlobalArgs) -> Result<Self> {
        let db_path = global.data_dir.join("db");
        std::fs::create_dir_all(&db_path)
            .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
        let db = RelicDb::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;

        let mut config = ProtocolConfig::default()
            .with_anchoring(!global.no_anchor)
            .with_deletion_mode(global.deletion_mode.into());
        if let Some(url) = &global.explorer_url {
            config = config.with_explorer(url.clone());
        }

        let store = Arc::new(SledAssetStore::new(db.clone()));
        let ledger = Arc::new(LocalLedger::open(db.clone()).context("failed to open local ledger")?);
        let crypto = Arc::new(StandardCrypto);

        let coordinator = TransferCoordinator::new(
            store.clone(),
            Arc::new(SledSessionRepository::new(db.clone())),
            ledger.clone(),
            crypto.clone(),
            config.clone(),
        );
        let provenance = Arc::new(ProvenanceLedger::new(
            Arc::new(SledChainRepository::new(db.clone())),
            store.clone(),
            ledger,
            crypto,
            config.clone(),
        ));

        tracing::debug!(data_dir = %global.data_dir.display(), anchor = config.anchor_on_ledger, "relic opened");
        Ok(Self {
            db,
            config,
            store,
            coordinator,
            provenance,
            keys: KeyStore::new(&global.data_dir),
        })
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = RelicCli::parse();
    logging::init_logging(
        &cli.global.log_level,
        LogFormat::from_str_lossy(&cli.global.log_format),
    );

    let relic = Relic::open(&cli.global)?;
    let outcome = run(&relic, cli.command).await;
    relic.db.flush().context("failed to flush database")?;
    outcome
}

async fn run(relic: &Relic, command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Keygen { owner } => {
            let identity = relic.keys.create(&owner)?;
            print_json(&identity.card())?;
        }
        Commands::Import(args) => import(relic, args).await?,
        Commands::Transfer(cmd) => transfer(relic, cmd).await?,
        Commands::Open(args) => open(relic, args).await?,
        Commands::Verify { asset_id, content } => {
            let bytes = content.as_deref().map(read_file).transpose()?;
            let result = relic
                .provenance
                .verify_provenance(&asset_id, bytes.as_deref())
                .await?;
            print_json(&result)?;
            if !result.verified {
                return Ok(ExitCode::from(2));
            }
        }
        Commands::Assets => {
            let mut assets = Vec::new();
            for asset_id in relic.provenance.list_assets()? {
                if let Some(chain) = relic.provenance.get_chain(&asset_id)? {
                    assets.push(json!({
                        "asset_id": asset_id,
                        "owner": chain.current_owner(),
                        "records": chain.len(),
                        "ledger_anchored": chain.ledger_anchored,
                    }));
                }
            }
            print_json(&assets)?;
        }
        Commands::Certificate {
            asset_id,
            text,
            issuer,
        } => {
            let issuer = relic.keys.load_or_create(&issuer)?;
            let generator =
                CertificateGenerator::new(relic.provenance.clone(), issuer.signing, relic.config.clone());
            let certificate = generator
                .generate(&asset_id)
                .await?
                .with_context(|| format!("no provenance chain for {}", asset_id))?;
            if text {
                print!("{}", certificate.render());
            } else {
                print_json(&certificate)?;
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn import(relic: &Relic, args: ImportArgs) -> Result<()> {
    let content = read_file(&args.file)?;
    let asset_id = args
        .asset_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let name = match args.name {
        Some(name) => name,
        None => args
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| asset_id.clone()),
    };

    let mut metadata = AssetMetadata::new(&asset_id, name, &args.owner, &content);
    metadata.uri = args.uri;
    metadata.content_type = args.content_type;
    relic.store.put_asset(&metadata, &content).await?;

    let chain = match relic
        .provenance
        .register_asset_provenance(&asset_id, &args.owner)
        .await
    {
        Ok(chain) => chain,
        Err(e) => {
            // Nothing references the asset yet; take it back out.
            relic.store.delete_asset(&asset_id).await?;
            return Err(e).context("provenance registration failed");
        }
    };

    tracing::info!(asset_id = %asset_id, owner = %args.owner, "asset imported");
    print_json(&json!({
        "asset_id": asset_id,
        "fingerprint": chain.content_fingerprint,
        "ledger_anchored": chain.ledger_anchored,
        "registration_tx": chain.records[0].ledger_tx_ref,
    }))
}

async fn transfer(relic: &Relic, command: TransferCommand) -> Result<()> {
    let coordinator = &relic.coordinator;
    match command {
        TransferCommand::Initiate { asset_id, buyer } => {
            let session = coordinator.initiate(&asset_id, &buyer).await?;
            print_json(&session)
        }
        TransferCommand::Package {
            transfer_id,
            buyer_key,
            out,
        } => {
            let session = coordinator
                .get_transfer(&transfer_id)?
                .with_context(|| format!("unknown transfer {}", transfer_id))?;
            let seller = relic.keys.load(&session.seller_id)?;
            let buyer_key = match buyer_key {
                Some(hex) => DeliveryPublicKey::from_hex(&hex).context("invalid buyer delivery key")?,
                None => relic.keys.load(&session.buyer_id)?.delivery_public_key(),
            };

            let package = coordinator
                .create_secure_transfer_package(&transfer_id, &seller.signing, &buyer_key)
                .await?;

            let out = out.unwrap_or_else(|| PathBuf::from(format!("{}.relic.json", transfer_id)));
            let json = serde_json::to_vec_pretty(&package)?;
            std::fs::write(&out, json)
                .with_context(|| format!("failed to write package to {}", out.display()))?;

            print_json(&json!({
                "transfer_id": transfer_id,
                "package": out,
                "deletion_proof": package.deletion_proof,
            }))
        }
        TransferCommand::Complete { transfer_id } => {
            let tx_ref = coordinator.complete_transfer_on_ledger(&transfer_id).await?;
            print_json(&json!({
                "transfer_id": transfer_id,
                "tx_ref": tx_ref,
                "explorer": relic.config.explorer_link(tx_ref.as_str()),
            }))
        }
        TransferCommand::Record { transfer_id } => {
            let session = coordinator
                .get_transfer(&transfer_id)?
                .with_context(|| format!("unknown transfer {}", transfer_id))?;
            let proof = session
                .deletion_proof
                .clone()
                .with_context(|| format!("transfer {} has no deletion proof", transfer_id))?;
            let chain = relic.provenance.record_transfer(&session, &proof).await?;
            print_json(&chain)
        }
        TransferCommand::Recover { transfer_id } => {
            let session = coordinator.recover_interrupted(&transfer_id).await?;
            print_json(&session)
        }
        TransferCommand::Reconcile {
            transfer_id,
            action,
        } => {
            let session = coordinator
                .reconcile_failed_transfer(&transfer_id, action.into())
                .await?;
            print_json(&session)
        }
        TransferCommand::Show { transfer_id } => {
            let session = coordinator
                .get_transfer(&transfer_id)?
                .with_context(|| format!("unknown transfer {}", transfer_id))?;
            print_json(&session)
        }
        TransferCommand::List { active } => {
            let sessions = if active {
                coordinator.get_active_transfers()?
            } else {
                coordinator.list_transfers()?
            };
            print_json(&sessions)
        }
    }
}

async fn open(relic: &Relic, args: OpenArgs) -> Result<()> {
    let bytes = read_file(&args.package)?;
    let package: SecureTransferPackage = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a transfer package", args.package.display()))?;

    let meta = &package.transfer_metadata;
    if meta.buyer_id != args.buyer {
        bail!("package is addressed to {}, not {}", meta.buyer_id, args.buyer);
    }
    let buyer = relic.keys.load(&args.buyer)?;
    let seller_key = match &args.seller_key {
        Some(hex) => RelicPublicKey::from_hex(hex).context("invalid seller public key")?,
        None => relic.keys.load(&meta.seller_id)?.signing.public_key(),
    };

    let (content, metadata) =
        relic
            .coordinator
            .packager()
            .open_package(&package, &buyer.delivery, &seller_key)?;
    std::fs::write(&args.out, &content)
        .with_context(|| format!("failed to write content to {}", args.out.display()))?;

    if args.import {
        let mut owned = metadata.without_pending();
        owned.owner = args.buyer.clone();
        relic.store.put_asset(&owned, &content).await?;
    }

    tracing::info!(asset_id = %package.asset_id, buyer = %args.buyer, "package opened");
    print_json(&json!({
        "asset_id": package.asset_id,
        "out": args.out,
        "bytes": content.len(),
        "content_hash": metadata.content_hash,
        "imported": args.import,
    }))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
