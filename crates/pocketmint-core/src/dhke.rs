//! Blind Diffie-Hellman key exchange over secp256k1.
//!
//! The client blinds `Y = hashToCurve(secret)` as `B_ = Y + r*G`, the mint
//! answers `C_ = k*B_`, and unblinding `C = C_ - r*K` leaves `k*Y`: a
//! signature over the secret that the mint can recognize without ever having
//! seen it.

use rand_core::{CryptoRng, RngCore};
use secp256k1::{PublicKey, Scalar, SecretKey};

use crate::crypto::{
    hash_to_curve, random_blinding_factor, BlindingFactor, CurvePoint, Secret, SECP,
};
use crate::error::{Result, WalletError};
use crate::protocol::{MintKeys, Promise, Proof};

/// Blinds a message with a freshly sampled factor. The factor must never be
/// reused across outputs.
pub fn blind_message<R>(message: &[u8], rng: &mut R) -> Result<(CurvePoint, BlindingFactor)>
where
    R: CryptoRng + RngCore,
{
    let r = random_blinding_factor(rng);
    let blinded = blind_message_with(message, &r)?;
    Ok((blinded, r))
}

pub fn blind_message_with(message: &[u8], r: &BlindingFactor) -> Result<CurvePoint> {
    let y = hash_to_curve(message)?;
    let r_g = PublicKey::from_secret_key(&SECP, &r.0);
    let blinded = y
        .0
        .combine(&r_g)
        .map_err(|e| WalletError::Crypto(format!("blinding failed: {e}")))?;
    Ok(CurvePoint(blinded))
}

/// Strips the blinding from a mint signature: `C = C_ - r*K`.
pub fn unblind_signature(
    blinded_signature: &CurvePoint,
    r: &BlindingFactor,
    mint_key: &CurvePoint,
) -> Result<CurvePoint> {
    let r_k = mint_key
        .0
        .mul_tweak(&SECP, &Scalar::from(r.0))
        .map_err(|e| WalletError::Crypto(format!("unblinding failed: {e}")))?;
    let c = blinded_signature
        .0
        .combine(&r_k.negate(&SECP))
        .map_err(|e| WalletError::Crypto(format!("unblinding failed: {e}")))?;
    Ok(CurvePoint(c))
}

/// Mint-side signing: `C_ = k*B_`. Used by tests and mock mints.
pub fn sign_blinded(key: &SecretKey, blinded_message: &CurvePoint) -> Result<CurvePoint> {
    let c = blinded_message
        .0
        .mul_tweak(&SECP, &Scalar::from(*key))
        .map_err(|e| WalletError::Crypto(format!("signing failed: {e}")))?;
    Ok(CurvePoint(c))
}

/// Mint-side check that `c` is `k*hashToCurve(secret)`. The message is the
/// exact UTF-8 bytes of the wire secret string.
pub fn verify_signature(key: &SecretKey, secret: &str, c: &CurvePoint) -> Result<bool> {
    let y = hash_to_curve(secret.as_bytes())?;
    let expected = y
        .0
        .mul_tweak(&SECP, &Scalar::from(*key))
        .map_err(|e| WalletError::Crypto(format!("verification failed: {e}")))?;
    Ok(expected == c.0)
}

/// Unblinds a batch of promises against the blinding factors and secrets
/// they were prepared with, positionally.
///
/// The mint may answer with fewer promises than outputs were sent (melt
/// change fills only as many blanks as needed); a longer reply is rejected.
pub fn construct_proofs(
    promises: &[Promise],
    rs: &[BlindingFactor],
    secrets: &[Secret],
    keys: &MintKeys,
) -> Result<Vec<Proof>> {
    if rs.len() != secrets.len() {
        return Err(WalletError::Crypto(
            "blinding factors and secrets out of step".to_string(),
        ));
    }
    if promises.len() > rs.len() {
        return Err(WalletError::Crypto(
            "more promises than prepared outputs".to_string(),
        ));
    }

    let mut proofs = Vec::with_capacity(promises.len());
    for (i, promise) in promises.iter().enumerate() {
        let mint_key = keys
            .get(promise.amount)
            .ok_or(WalletError::InvalidKeyset {
                amount: promise.amount,
            })?;
        let c = unblind_signature(&promise.c, &rs[i], mint_key)?;
        proofs.push(Proof {
            id: promise.id.clone(),
            amount: promise.amount,
            secret: secrets[i].encoded(),
            c,
        });
    }
    Ok(proofs)
}
