use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use pocketmint_core::pending::{PendingOutputs, PendingStore};
use pocketmint_core::protocol::{proofs_total, Proof};
use pocketmint_core::token::{encode_token, Token, TokenEntry};
use pocketmint_core::wallet::Wallet;
use pocketmint_http::{HttpMintConfig, HttpMintConnector};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Serialize, Deserialize)]
struct WalletFile {
    mint_url: String,
    proofs: Vec<Proof>,
}

#[derive(Parser)]
#[command(name = "pocketmint-wallet")]
struct Cli {
    #[arg(long, default_value_t = default_wallet_dir())]
    wallet_dir: String,
    #[arg(long)]
    mint_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a wallet file bound to one mint.
    Init,
    /// Ask the mint for a Lightning invoice funding an issuance.
    Invoice {
        #[arg(long)]
        amount: u64,
    },
    /// Redeem a paid invoice into proofs.
    Mint {
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        hash: String,
    },
    /// Sum of the stored proofs.
    Balance,
    /// Export a token worth exactly the given amount.
    Send {
        #[arg(long)]
        amount: u64,
    },
    /// Redeem an encoded token into this wallet.
    Receive {
        #[arg(long)]
        token: String,
    },
    /// Pay a Lightning invoice of the given amount from stored proofs.
    Pay {
        #[arg(long)]
        invoice: String,
        #[arg(long)]
        amount: u64,
    },
    /// Drop proofs the mint reports as already spent.
    CheckSpent,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    tracing_subscriber::fmt().init();
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let store = WalletStore::open(&cli.wallet_dir);

    if let Commands::Init = cli.command {
        store.create(&require_mint_url(&cli)?)?;
        println!("wallet created at {}", store.path().display());
        return Ok(());
    }

    let mut file = store.load()?;
    let connector = Arc::new(HttpMintConnector::new(HttpMintConfig::default())?);
    let pending = Arc::new(FilePendingStore::new(&cli.wallet_dir)?);
    let wallet = Wallet::connect(file.mint_url.clone(), connector, pending).await?;
    let mut rng = OsRng;

    match &cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Invoice { amount } => {
            let response = wallet.request_mint(*amount).await?;
            println!("invoice: {}", response.pr);
            println!("hash: {}", response.hash);
        }
        Commands::Mint { amount, hash } => {
            let proofs = wallet.request_tokens(&mut rng, *amount, hash).await?;
            file.proofs.extend(proofs);
            store.save(&file)?;
            println!("balance: {} sat", proofs_total(&file.proofs));
        }
        Commands::Balance => {
            println!("balance: {} sat", proofs_total(&file.proofs));
        }
        Commands::Send { amount } => {
            let result = wallet
                .send(&mut rng, *amount, std::mem::take(&mut file.proofs))
                .await?;
            file.proofs = result.return_change;
            store.save(&file)?;
            let token = Token {
                token: vec![TokenEntry {
                    mint: file.mint_url.clone(),
                    proofs: result.send,
                }],
                memo: None,
            };
            println!("{}", encode_token(&token)?);
        }
        Commands::Receive { token } => {
            let result = wallet.receive(&mut rng, token).await?;
            let received = proofs_total(&result.proofs);
            file.proofs.extend(result.proofs);
            store.save(&file)?;
            println!("received: {received} sat");
            if let Some(errors) = result.tokens_with_errors {
                eprintln!(
                    "some entries failed and were not redeemed; retry with: {}",
                    encode_token(&errors)?
                );
            }
        }
        Commands::Pay { invoice, amount } => {
            let fee_reserve = wallet.check_fees(invoice).await?;
            let result = wallet
                .send(
                    &mut rng,
                    amount + fee_reserve,
                    std::mem::take(&mut file.proofs),
                )
                .await?;

            // The melted proofs leave the file before dispatch; if the reply
            // is lost they must be treated as potentially spent.
            file.proofs = result.return_change;
            store.save(&file)?;

            match wallet
                .pay_ln_invoice(&mut rng, invoice, result.send.clone(), Some(fee_reserve))
                .await
            {
                Ok(melt) if melt.is_paid => {
                    file.proofs.extend(melt.change);
                    store.save(&file)?;
                    match melt.preimage {
                        Some(preimage) => println!("paid, preimage: {preimage}"),
                        None => println!("paid"),
                    }
                }
                Ok(_) => {
                    // The mint refused the payment, so the proofs were not
                    // consumed; put them back.
                    file.proofs.extend(result.send);
                    store.save(&file)?;
                    return Err(anyhow!("payment was not completed"));
                }
                Err(e) => {
                    return Err(anyhow!(
                        "melt did not complete: {e}; the submitted proofs were removed from the wallet and must be treated as potentially spent; run check-spent before restoring them"
                    ));
                }
            }
        }
        Commands::CheckSpent => {
            let spent = wallet.check_proofs_spent(&file.proofs).await?;
            file.proofs.retain(|proof| !spent.contains(proof));
            store.save(&file)?;
            println!(
                "dropped {} spent proofs, balance: {} sat",
                spent.len(),
                proofs_total(&file.proofs)
            );
        }
    }

    Ok(())
}

/// The wallet file under its directory. Every write lands through
/// [`persist_json`], so a crash never leaves a truncated wallet behind.
struct WalletStore {
    path: PathBuf,
}

impl WalletStore {
    fn open(dir: &str) -> Self {
        WalletStore {
            path: Path::new(dir).join("wallet.json"),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn create(&self, mint_url: &str) -> Result<()> {
        if self.path.exists() {
            return Err(anyhow!(
                "wallet file already exists at {}",
                self.path.display()
            ));
        }
        self.save(&WalletFile {
            mint_url: mint_url.to_string(),
            proofs: Vec::new(),
        })
    }

    fn load(&self) -> Result<WalletFile> {
        let data = fs::read(&self.path).map_err(|e| {
            anyhow!(
                "cannot read wallet file {}: {e}; run init first",
                self.path.display()
            )
        })?;
        self.warn_if_world_readable();
        Ok(serde_json::from_slice(&data)?)
    }

    fn save(&self, wallet: &WalletFile) -> Result<()> {
        persist_json(&self.path, &serde_json::to_vec_pretty(wallet)?)?;
        Ok(())
    }

    #[cfg(unix)]
    fn warn_if_world_readable(&self) {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(&self.path) {
            let mode = metadata.permissions().mode() & 0o777;
            if mode != 0o600 {
                eprintln!("warning: wallet file permissions are {mode:o}, expected 0600");
            }
        }
    }

    #[cfg(not(unix))]
    fn warn_if_world_readable(&self) {}
}

/// Writes bytes through a sibling temp file and renames it into place,
/// owner-read-write only.
fn persist_json(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let staging = path.with_extension("tmp");
    let mut file = fs::File::create(&staging)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    restrict_to_owner(&staging)?;
    fs::rename(&staging, path)
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Blinding material for in-flight operations, one JSON file per operation.
/// Records of failed dispatches stay on disk for replay recovery.
struct FilePendingStore {
    dir: PathBuf,
}

impl FilePendingStore {
    fn new(wallet_dir: &str) -> Result<Self> {
        let dir = Path::new(wallet_dir).join("pending");
        fs::create_dir_all(&dir)?;
        Ok(FilePendingStore { dir })
    }

    fn record_path(&self, operation_id: &str) -> PathBuf {
        self.dir.join(format!("{operation_id}.json"))
    }
}

impl PendingStore for FilePendingStore {
    fn save(&self, pending: &PendingOutputs) -> pocketmint_core::error::Result<()> {
        let json = serde_json::to_vec_pretty(pending)?;
        persist_json(&self.record_path(&pending.operation_id), &json)?;
        Ok(())
    }

    fn clear(&self, operation_id: &str) -> pocketmint_core::error::Result<()> {
        match fs::remove_file(self.record_path(operation_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn default_wallet_dir() -> String {
    let home = env::var("HOME").or_else(|_| env::var("USERPROFILE"));
    match home {
        Ok(home) => Path::new(&home)
            .join(".pocketmint")
            .to_string_lossy()
            .into_owned(),
        Err(_) => ".pocketmint".to_string(),
    }
}

fn require_mint_url(cli: &Cli) -> Result<String> {
    if let Some(url) = &cli.mint_url {
        return Ok(url.clone());
    }
    if let Ok(env_url) = env::var("MINT_URL") {
        return Ok(env_url);
    }
    Err(anyhow!("--mint-url flag or MINT_URL env var is required"))
}
