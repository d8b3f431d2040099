use std::collections::HashMap;
use std::sync::Arc;

use rand_core::{CryptoRng, RngCore};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::amount::{blank_output_count, split_amount};
use crate::crypto::{random_secret, BlindingFactor, Secret};
use crate::dhke::{blind_message, construct_proofs};
use crate::error::{Result, WalletError};
use crate::mint::MintConnector;
use crate::pending::{PendingOutputs, PendingStore};
use crate::protocol::{
    proofs_total, BlindedMessage, CheckFeesRequest, CheckSpendableRequest, MeltRequest, MintKeys,
    MintRequest, Proof, ProofSecret, RequestMintResponse, SplitRequest,
};
use crate::token::{clean_token, decode_token, Token, TokenEntry};

/// Outcome of `send`: the proofs to hand over and the proofs to keep.
#[derive(Clone, Debug)]
pub struct SendResult {
    pub send: Vec<Proof>,
    pub return_change: Vec<Proof>,
}

/// Outcome of `receive`. Entries that failed are bundled verbatim so the
/// caller can retry them; a failure on one entry never discards another.
#[derive(Clone, Debug)]
pub struct ReceiveResult {
    pub proofs: Vec<Proof>,
    pub tokens_with_errors: Option<Token>,
}

/// Outcome of `pay_ln_invoice`.
#[derive(Clone, Debug)]
pub struct MeltResult {
    pub is_paid: bool,
    pub preimage: Option<String>,
    pub change: Vec<Proof>,
}

/// Blinded outputs paired with the material needed to unblind the mint's
/// reply. The three vectors stay in positional correspondence.
#[derive(Default)]
struct OutputBundle {
    outputs: Vec<BlindedMessage>,
    secrets: Vec<Secret>,
    rs: Vec<BlindingFactor>,
}

impl OutputBundle {
    fn push<R>(&mut self, amount: u64, rng: &mut R) -> Result<()>
    where
        R: CryptoRng + RngCore,
    {
        let secret = random_secret(rng);
        let (blinded, r) = blind_message(secret.encoded().as_bytes(), rng)?;
        self.outputs.push(BlindedMessage { amount, b: blinded });
        self.secrets.push(secret);
        self.rs.push(r);
        Ok(())
    }
}

/// Blinded outputs for every denomination of `amount`, ascending.
/// `amount = 0` yields an empty bundle, which keeps a zero-valued split side
/// a no-op.
fn create_blinded_outputs<R>(amount: u64, rng: &mut R) -> Result<OutputBundle>
where
    R: CryptoRng + RngCore,
{
    let mut bundle = OutputBundle::default();
    for denomination in split_amount(amount) {
        bundle.push(denomination, rng)?;
    }
    Ok(bundle)
}

/// Zero-amount outputs that carry melt change when the fee reserve
/// overestimates the actual routing fee.
fn create_blank_outputs<R>(fee_reserve: u64, rng: &mut R) -> Result<OutputBundle>
where
    R: CryptoRng + RngCore,
{
    let mut bundle = OutputBundle::default();
    for _ in 0..blank_output_count(fee_reserve) {
        bundle.push(0, rng)?;
    }
    Ok(bundle)
}

/// The wallet engine. Scoped to a single mint; foreign mints are touched
/// only while receiving cross-mint tokens.
///
/// Proofs are bearer objects: concurrent operations on one wallet instance
/// must not share unspent proofs, or the mint will reject the second
/// submission. Callers that run operations concurrently should serialize
/// them behind a lock.
pub struct Wallet {
    mint_url: String,
    keys: MintKeys,
    connector: Arc<dyn MintConnector>,
    pending: Arc<dyn PendingStore>,
}

impl Wallet {
    pub fn new(
        mint_url: impl Into<String>,
        keys: MintKeys,
        connector: Arc<dyn MintConnector>,
        pending: Arc<dyn PendingStore>,
    ) -> Self {
        Wallet {
            mint_url: mint_url.into(),
            keys,
            connector,
            pending,
        }
    }

    /// Builds a wallet by fetching the mint's active keyset.
    pub async fn connect(
        mint_url: impl Into<String>,
        connector: Arc<dyn MintConnector>,
        pending: Arc<dyn PendingStore>,
    ) -> Result<Self> {
        let mint_url = mint_url.into();
        let keys = connector.get_keys(&mint_url).await?;
        debug!(mint = %mint_url, keyset = %keys.keyset_id(), "fetched mint keyset");
        Ok(Wallet::new(mint_url, keys, connector, pending))
    }

    pub fn mint_url(&self) -> &str {
        &self.mint_url
    }

    pub fn keys(&self) -> &MintKeys {
        &self.keys
    }

    /// Asks the mint for a Lightning invoice funding an issuance of
    /// `amount`.
    pub async fn request_mint(&self, amount: u64) -> Result<RequestMintResponse> {
        self.connector.request_mint(&self.mint_url, amount).await
    }

    /// The mint's fee reserve for paying `invoice`.
    pub async fn check_fees(&self, invoice: &str) -> Result<u64> {
        let response = self
            .connector
            .check_fees(
                &self.mint_url,
                CheckFeesRequest {
                    pr: invoice.to_string(),
                },
            )
            .await?;
        Ok(response.fee)
    }

    /// Redeems a paid mint request into fresh proofs.
    pub async fn request_tokens<R>(&self, rng: &mut R, amount: u64, hash: &str) -> Result<Vec<Proof>>
    where
        R: CryptoRng + RngCore + Send,
    {
        let bundle = create_blinded_outputs(amount, rng)?;
        let operation_id = self.stash_pending(&self.mint_url, &bundle)?;

        let response = self
            .connector
            .mint(
                &self.mint_url,
                MintRequest {
                    outputs: bundle.outputs.clone(),
                },
                hash,
            )
            .await?;

        let proofs = construct_proofs(&response.promises, &bundle.rs, &bundle.secrets, &self.keys)?;
        self.pending.clear(&operation_id)?;
        debug!(amount, count = proofs.len(), "minted proofs");
        Ok(proofs)
    }

    /// Selects proofs worth at least `amount` greedily and splits off the
    /// exact value via the mint when the selection overshoots. Raises
    /// `InsufficientFunds` before any RPC.
    ///
    /// Selection walks the proof list from the back, so the largest
    /// denominations of an ascending bag are tried first and a proof that
    /// matches the amount exactly skips the split round-trip. Unselected
    /// proofs come back in input order.
    pub async fn send<R>(&self, rng: &mut R, amount: u64, proofs: Vec<Proof>) -> Result<SendResult>
    where
        R: CryptoRng + RngCore + Send,
    {
        let mut proofs_to_send = Vec::new();
        let mut change = Vec::new();
        let mut selected = 0u64;
        for proof in proofs.into_iter().rev() {
            if selected < amount {
                selected += proof.amount;
                proofs_to_send.push(proof);
            } else {
                change.push(proof);
            }
        }
        proofs_to_send.reverse();
        change.reverse();

        if selected < amount {
            return Err(WalletError::InsufficientFunds {
                available: selected,
                required: amount,
            });
        }

        if selected == amount {
            debug!(amount, "exact send, no split needed");
            return Ok(SendResult {
                send: proofs_to_send,
                return_change: change,
            });
        }

        let keep_amount = selected - amount;
        let (kept, sent) = self
            .split_proofs(
                rng,
                &self.mint_url,
                &self.keys,
                proofs_to_send,
                keep_amount,
                amount,
            )
            .await?;

        let mut return_change = kept;
        return_change.extend(change);
        Ok(SendResult {
            send: sent,
            return_change,
        })
    }

    /// Redeems an encoded token, reissuing every entry's proofs under fresh
    /// blinding. Entries from foreign mints are split against their own
    /// mint with keys fetched on demand; a failing entry lands in
    /// `tokens_with_errors` instead of aborting its siblings.
    pub async fn receive<R>(&self, rng: &mut R, encoded_token: &str) -> Result<ReceiveResult>
    where
        R: CryptoRng + RngCore + Send,
    {
        let token = clean_token(decode_token(encoded_token)?);

        let mut keyset_cache: HashMap<String, MintKeys> = HashMap::new();
        keyset_cache.insert(self.mint_url.clone(), self.keys.clone());

        let mut proofs = Vec::new();
        let mut failed_entries = Vec::new();
        for entry in token.token {
            if entry.proofs.is_empty() {
                continue;
            }
            match self
                .receive_token_entry(rng, &mut keyset_cache, &entry)
                .await
            {
                Ok(received) => proofs.extend(received),
                Err(e) => {
                    warn!(mint = %entry.mint, "token entry failed: {e}");
                    failed_entries.push(entry);
                }
            }
        }

        let tokens_with_errors = if failed_entries.is_empty() {
            None
        } else {
            Some(Token {
                token: failed_entries,
                memo: None,
            })
        };

        Ok(ReceiveResult {
            proofs,
            tokens_with_errors,
        })
    }

    /// Pays a Lightning invoice by melting `proofs_to_send`, which must
    /// cover the invoice amount plus the fee reserve. Unspent reserve comes
    /// back through the blank outputs as change proofs.
    pub async fn pay_ln_invoice<R>(
        &self,
        rng: &mut R,
        invoice: &str,
        proofs_to_send: Vec<Proof>,
        fee_reserve: Option<u64>,
    ) -> Result<MeltResult>
    where
        R: CryptoRng + RngCore + Send,
    {
        let fee_reserve = match fee_reserve {
            Some(fee) => fee,
            None => {
                self.connector
                    .check_fees(
                        &self.mint_url,
                        CheckFeesRequest {
                            pr: invoice.to_string(),
                        },
                    )
                    .await?
                    .fee
            }
        };

        let bundle = create_blank_outputs(fee_reserve, rng)?;
        let operation_id = self.stash_pending(&self.mint_url, &bundle)?;

        let response = self
            .connector
            .melt(
                &self.mint_url,
                MeltRequest {
                    pr: invoice.to_string(),
                    proofs: proofs_to_send,
                    outputs: bundle.outputs.clone(),
                },
            )
            .await?;

        let change = match &response.change {
            Some(promises) => construct_proofs(promises, &bundle.rs, &bundle.secrets, &self.keys)?,
            None => Vec::new(),
        };
        self.pending.clear(&operation_id)?;

        let is_paid = response.paid.unwrap_or(false);
        debug!(is_paid, change = change.len(), "melt finished");
        Ok(MeltResult {
            is_paid,
            preimage: response.preimage,
            change,
        })
    }

    /// Returns the subset of `proofs` the mint reports as already spent.
    /// The request leaks only secrets, never `C` or amounts. Informational:
    /// the caller owns the state update.
    pub async fn check_proofs_spent(&self, proofs: &[Proof]) -> Result<Vec<Proof>> {
        let request = CheckSpendableRequest {
            proofs: proofs
                .iter()
                .map(|p| ProofSecret {
                    secret: p.secret.clone(),
                })
                .collect(),
        };
        let response = self.connector.check_spendable(&self.mint_url, request).await?;
        if response.spendable.len() != proofs.len() {
            return Err(WalletError::mint("spendable vector length mismatch"));
        }
        Ok(proofs
            .iter()
            .zip(response.spendable)
            .filter(|(_, spendable)| !spendable)
            .map(|(proof, _)| proof.clone())
            .collect())
    }

    /// The split sub-protocol. The kept side's outputs come first in the
    /// combined array, the sent side's after; the mint's `fst`/`snd` reply
    /// honors that boundary and each half is unblinded with its own
    /// material.
    async fn split_proofs<R>(
        &self,
        rng: &mut R,
        mint_url: &str,
        keys: &MintKeys,
        proofs: Vec<Proof>,
        keep_amount: u64,
        send_amount: u64,
    ) -> Result<(Vec<Proof>, Vec<Proof>)>
    where
        R: CryptoRng + RngCore + Send,
    {
        let keep_bundle = create_blinded_outputs(keep_amount, rng)?;
        let send_bundle = create_blinded_outputs(send_amount, rng)?;

        let mut outputs = keep_bundle.outputs.clone();
        outputs.extend(send_bundle.outputs.iter().cloned());

        let mut combined = OutputBundle {
            outputs,
            secrets: keep_bundle.secrets.clone(),
            rs: keep_bundle.rs.clone(),
        };
        combined.secrets.extend(send_bundle.secrets.iter().cloned());
        combined.rs.extend(send_bundle.rs.iter().cloned());
        let operation_id = self.stash_pending(mint_url, &combined)?;

        debug!(
            mint = %mint_url,
            keep_amount,
            send_amount,
            outputs = combined.outputs.len(),
            "splitting proofs"
        );
        let response = self
            .connector
            .split(
                mint_url,
                SplitRequest {
                    proofs,
                    amount: send_amount,
                    outputs: combined.outputs,
                },
            )
            .await?;

        let kept = construct_proofs(&response.fst, &keep_bundle.rs, &keep_bundle.secrets, keys)?;
        let sent = construct_proofs(&response.snd, &send_bundle.rs, &send_bundle.secrets, keys)?;
        self.pending.clear(&operation_id)?;
        Ok((kept, sent))
    }

    /// Reissues one entry by splitting its full value into the sent side
    /// against the entry's own mint. The kept side is zero-valued and
    /// produces no outputs.
    async fn receive_token_entry<R>(
        &self,
        rng: &mut R,
        keyset_cache: &mut HashMap<String, MintKeys>,
        entry: &TokenEntry,
    ) -> Result<Vec<Proof>>
    where
        R: CryptoRng + RngCore + Send,
    {
        let keys = match keyset_cache.get(&entry.mint) {
            Some(keys) => keys.clone(),
            None => {
                let keys = self.connector.get_keys(&entry.mint).await?;
                keyset_cache.insert(entry.mint.clone(), keys.clone());
                keys
            }
        };

        let total = proofs_total(&entry.proofs);
        let (kept, sent) = self
            .split_proofs(rng, &entry.mint, &keys, entry.proofs.clone(), 0, total)
            .await?;

        let mut received = kept;
        received.extend(sent);
        Ok(received)
    }

    fn stash_pending(&self, mint_url: &str, bundle: &OutputBundle) -> Result<String> {
        let operation_id = Uuid::new_v4().to_string();
        self.pending.save(&PendingOutputs {
            operation_id: operation_id.clone(),
            mint_url: mint_url.to_string(),
            outputs: bundle.outputs.clone(),
            secrets: bundle.secrets.clone(),
            rs: bundle.rs.clone(),
        })?;
        Ok(operation_id)
    }
}
