use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::CurvePoint;

/// A blinded output handed to the mint: `B_ = hashToCurve(secret) + r*G`.
/// Amount 0 marks a blank output used to carry melt change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlindedMessage {
    pub amount: u64,
    #[serde(rename = "B_")]
    pub b: CurvePoint,
}

/// The mint's blinded signature over one output: `C_ = k*B_`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Promise {
    pub id: String,
    pub amount: u64,
    #[serde(rename = "C_")]
    pub c: CurvePoint,
}

/// A bearer proof: whoever holds it can spend it. `C` is the unblinded
/// signature `k*hashToCurve(secret)` under the key for `amount`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub id: String,
    pub amount: u64,
    pub secret: String,
    #[serde(rename = "C")]
    pub c: CurvePoint,
}

pub fn proofs_total(proofs: &[Proof]) -> u64 {
    proofs.iter().map(|p| p.amount).sum()
}

/// Per-mint mapping from denomination to the mint public key for that
/// denomination. Immutable once fetched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintKeys(pub BTreeMap<u64, CurvePoint>);

impl MintKeys {
    pub fn get(&self, amount: u64) -> Option<&CurvePoint> {
        self.0.get(&amount)
    }

    /// Keyset identifier: the first 12 characters of the standard-base64
    /// SHA-256 over the hex public keys concatenated in ascending
    /// denomination order.
    pub fn keyset_id(&self) -> String {
        let mut hasher = Sha256::new();
        for point in self.0.values() {
            hasher.update(point.to_hex().as_bytes());
        }
        let digest = hasher.finalize();
        let encoded = STANDARD.encode(digest);
        encoded[..12].to_string()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestMintResponse {
    /// Bolt11 payment request to fund the issuance.
    pub pr: String,
    /// Opaque handle the mint uses to correlate the paid invoice.
    pub hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MintRequest {
    pub outputs: Vec<BlindedMessage>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostMintResponse {
    pub promises: Vec<Promise>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SplitRequest {
    pub proofs: Vec<Proof>,
    /// Value of the second output bundle; the first bundle carries the rest.
    pub amount: u64,
    pub outputs: Vec<BlindedMessage>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SplitResponse {
    /// Promises for the kept half, positionally matching the leading outputs.
    pub fst: Vec<Promise>,
    /// Promises for the sent half, positionally matching the trailing outputs.
    pub snd: Vec<Promise>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeltRequest {
    pub pr: String,
    pub proofs: Vec<Proof>,
    /// Blank outputs that carry change when the fee reserve overestimates.
    pub outputs: Vec<BlindedMessage>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeltResponse {
    pub paid: Option<bool>,
    pub preimage: Option<String>,
    pub change: Option<Vec<Promise>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckFeesRequest {
    pub pr: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckFeesResponse {
    pub fee: u64,
}

/// The spent-check payload deliberately carries only the secret, never `C`
/// or the amount.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofSecret {
    pub secret: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckSpendableRequest {
    pub proofs: Vec<ProofSecret>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckSpendableResponse {
    /// Positional: `spendable[i]` answers for `proofs[i]`.
    pub spendable: Vec<bool>,
}

/// Application-level error body returned by the mint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MintErrorBody {
    pub error: Option<String>,
    pub detail: Option<String>,
    pub code: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_keys_round_trip_json_object_keys() {
        let json = r#"{
            "1": "02c020067db727d586bc3183aecf97fcb800c3f4cc4759f69c626c9db5d8f5b5d4",
            "2": "02ac910bef28cbe5d7325415d5c263026f15f9b967a079ca9779ab6e5c2db133a7"
        }"#;
        let keys: MintKeys = serde_json::from_str(json).unwrap();
        assert_eq!(keys.0.len(), 2);
        assert!(keys.get(1).is_some());
        assert!(keys.get(4).is_none());

        let back = serde_json::to_string(&keys).unwrap();
        let again: MintKeys = serde_json::from_str(&back).unwrap();
        assert_eq!(again, keys);
    }

    #[test]
    fn keyset_id_is_stable_and_short() {
        let json = r#"{
            "1": "02c020067db727d586bc3183aecf97fcb800c3f4cc4759f69c626c9db5d8f5b5d4",
            "2": "02ac910bef28cbe5d7325415d5c263026f15f9b967a079ca9779ab6e5c2db133a7"
        }"#;
        let keys: MintKeys = serde_json::from_str(json).unwrap();
        let id = keys.keyset_id();
        assert_eq!(id.len(), 12);
        assert_eq!(id, keys.keyset_id());
    }

    #[test]
    fn proof_deserializes_wire_shape() {
        let json = r#"{"id":"DSAl9nvvyfva","amount":2,"secret":"EhpennC9qB3iFlW8FZ_pZwnpDjVMKls6lnnFRH7yu0g","C":"02c020067db727d586bc3183aecf97fcb800c3f4cc4759f69c626c9db5d8f5b5d4"}"#;
        let proof: Proof = serde_json::from_str(json).unwrap();
        assert_eq!(proof.id, "DSAl9nvvyfva");
        assert_eq!(proof.amount, 2);
        let back = serde_json::to_value(&proof).unwrap();
        assert!(back.get("C").is_some());
        assert!(back.get("c").is_none());
    }
}
