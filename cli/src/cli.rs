//! # CLI Interface
//!
//! Argument structure for `relic`, via `clap` derive. Global options can
//! all be set from the environment so a shell session can point every
//! command at the same data directory.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use relic_protocol::config::DeletionMode;
use relic_protocol::transfer::Reconciliation;

/// Transfer file-held assets with signed deletion proofs and keep their
/// provenance.
#[derive(Parser, Debug)]
#[command(name = "relic", version, propagate_version = true)]
pub struct RelicCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Directory holding the database and key files. Created if missing.
    #[arg(long, short = 'd', global = true, env = "RELIC_DATA_DIR", default_value = ".relic")]
    pub data_dir: PathBuf,

    /// Log format: "pretty" or "json".
    #[arg(long, global = true, env = "RELIC_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "relic=info,relic_protocol=info")]
    pub log_level: String,

    /// Ledger explorer base URL used for certificate links.
    #[arg(long, global = true, env = "RELIC_EXPLORER_URL")]
    pub explorer_url: Option<String>,

    /// Do not anchor registrations and transfers on the ledger.
    #[arg(long, global = true, env = "RELIC_NO_ANCHOR")]
    pub no_anchor: bool,

    /// How a sale removes the seller's copy.
    #[arg(long, global = true, env = "RELIC_DELETION_MODE", value_enum, default_value_t = DeletionArg::Quarantine)]
    pub deletion_mode: DeletionArg,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate signing and delivery keys for an owner.
    Keygen {
        /// Owner id the keys belong to.
        owner: String,
    },
    /// Add a file as a new asset and register its provenance.
    Import(ImportArgs),
    /// Drive a marketplace transfer.
    #[command(subcommand)]
    Transfer(TransferCommand),
    /// Decrypt a received package as its buyer.
    Open(OpenArgs),
    /// Verify an asset's provenance.
    Verify {
        asset_id: String,
        /// File whose bytes should match the registered fingerprint.
        #[arg(long)]
        content: Option<PathBuf>,
    },
    /// List assets that have a provenance chain.
    Assets,
    /// Issue a signed ownership certificate.
    Certificate {
        asset_id: String,
        /// Print the plain-text rendering instead of JSON.
        #[arg(long)]
        text: bool,
        /// Key file used to sign certificates. Generated on first use.
        #[arg(long, default_value = "relic-issuer")]
        issuer: String,
    },
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// File to import.
    pub file: PathBuf,
    /// Creator and first owner.
    #[arg(long)]
    pub owner: String,
    /// Display name. Defaults to the file name.
    #[arg(long)]
    pub name: Option<String>,
    /// Asset id. Defaults to a random UUID.
    #[arg(long)]
    pub asset_id: Option<String>,
    #[arg(long)]
    pub uri: Option<String>,
    #[arg(long)]
    pub content_type: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum TransferCommand {
    /// Start a transfer to a buyer.
    Initiate { asset_id: String, buyer: String },
    /// Encrypt for the buyer, delete the seller's copy, write the package.
    Package {
        transfer_id: String,
        /// Buyer's delivery public key (hex). Read from the buyer's key
        /// file when omitted.
        #[arg(long)]
        buyer_key: Option<String>,
        /// Where to write the package. Defaults to `<transfer_id>.relic.json`.
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },
    /// Confirm the transfer on the ledger.
    Complete { transfer_id: String },
    /// Append a confirmed transfer to the asset's provenance chain.
    Record { transfer_id: String },
    /// Fail a transfer a dead process left mid-step so it can be reconciled.
    Recover { transfer_id: String },
    /// Resolve a failed transfer.
    Reconcile {
        transfer_id: String,
        #[arg(long, value_enum)]
        action: ReconcileArg,
    },
    Show { transfer_id: String },
    List {
        /// Only transfers that have not completed or failed.
        #[arg(long)]
        active: bool,
    },
}

#[derive(Args, Debug)]
pub struct OpenArgs {
    /// Package file.
    pub package: PathBuf,
    /// Buyer whose delivery key opens the package.
    #[arg(long = "as")]
    pub buyer: String,
    /// Seller's signing public key (hex). Read from the seller's key file
    /// when omitted.
    #[arg(long)]
    pub seller_key: Option<String>,
    /// Where to write the decrypted content.
    #[arg(long, short = 'o')]
    pub out: PathBuf,
    /// Also add the content to the local store, owned by the buyer.
    #[arg(long)]
    pub import: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionArg {
    Quarantine,
    Hard,
}

impl From<DeletionArg> for DeletionMode {
    fn from(arg: DeletionArg) -> Self {
        match arg {
            DeletionArg::Quarantine => DeletionMode::Quarantine,
            DeletionArg::Hard => DeletionMode::Hard,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileArg {
    /// Put the seller's quarantined copy back.
    Restore,
    /// Discard the quarantined copy.
    Purge,
}

impl From<ReconcileArg> for Reconciliation {
    fn from(arg: ReconcileArg) -> Self {
        match arg {
            ReconcileArg::Restore => Reconciliation::RestoreToSeller,
            ReconcileArg::Purge => Reconciliation::Purge,
        }
    }
}
