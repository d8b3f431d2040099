//! Recovery hook for the hazardous window.
//!
//! If the mint commits server-side but the reply is lost, the client can
//! only reconstruct its proofs by replaying the identical outputs, and that
//! requires the blinding material to have survived the crash. The wallet
//! therefore persists `(outputs, secrets, rs)` through this store before
//! dispatching any of `mint`, `split`, `melt`, and clears the record only
//! after the reply has been unblinded. Records of failed dispatches are
//! retained for replay.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::crypto::{BlindingFactor, Secret};
use crate::error::Result;
use crate::protocol::BlindedMessage;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingOutputs {
    pub operation_id: String,
    pub mint_url: String,
    pub outputs: Vec<BlindedMessage>,
    pub secrets: Vec<Secret>,
    pub rs: Vec<BlindingFactor>,
}

pub trait PendingStore: Send + Sync {
    fn save(&self, pending: &PendingOutputs) -> Result<()>;

    fn clear(&self, operation_id: &str) -> Result<()>;
}

/// Process-local store, suitable for tests and short-lived wallets. A
/// durable wallet should persist records before dispatch, the same way it
/// persists proofs.
#[derive(Default)]
pub struct InMemoryPendingStore {
    records: Mutex<HashMap<String, PendingOutputs>>,
}

impl InMemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, operation_id: &str) -> Option<PendingOutputs> {
        self.records
            .lock()
            .expect("pending store lock poisoned")
            .get(operation_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .expect("pending store lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PendingStore for InMemoryPendingStore {
    fn save(&self, pending: &PendingOutputs) -> Result<()> {
        self.records
            .lock()
            .expect("pending store lock poisoned")
            .insert(pending.operation_id.clone(), pending.clone());
        Ok(())
    }

    fn clear(&self, operation_id: &str) -> Result<()> {
        self.records
            .lock()
            .expect("pending store lock poisoned")
            .remove(operation_id);
        Ok(())
    }
}
