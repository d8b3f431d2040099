use core::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use lazy_static::lazy_static;
use rand_core::{CryptoRng, RngCore};
use secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use serde::de::{Error as DeError, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{Result, WalletError};

lazy_static! {
    pub static ref SECP: Secp256k1<All> = Secp256k1::new();
}

const HASH_TO_CURVE_MAX_ROUNDS: usize = 128;

/// A point on secp256k1. Wire form is the 33-byte compressed SEC1 encoding
/// as a lowercase hex string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CurvePoint(pub PublicKey);

/// The blinding scalar `r` paired with one blinded output. Non-zero by
/// construction, wiped on drop.
#[derive(Clone, Debug, PartialEq)]
pub struct BlindingFactor(pub SecretKey);

impl Zeroize for BlindingFactor {
    fn zeroize(&mut self) {
        self.0.non_secure_erase();
    }
}

impl Drop for BlindingFactor {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// 32 uniformly random bytes. The wire identity of a secret is the
/// base64url-no-pad encoding of the raw bytes; the UTF-8 bytes of that
/// string are what the mint signs.
#[derive(Clone, Debug, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct Secret(pub [u8; 32]);

impl CurvePoint {
    pub fn from_hex(v: &str) -> Result<Self> {
        let bytes = hex::decode(v).map_err(|e| WalletError::Crypto(e.to_string()))?;
        let point =
            PublicKey::from_slice(&bytes).map_err(|e| WalletError::Crypto(e.to_string()))?;
        Ok(CurvePoint(point))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.serialize())
    }
}

impl Serialize for CurvePoint {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

struct CurvePointVisitor;

impl<'de> Visitor<'de> for CurvePointVisitor {
    type Value = CurvePoint;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a 66-character lowercase hex string encoding a compressed secp256k1 point")
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
    where
        E: DeError,
    {
        let bytes = hex::decode(v).map_err(E::custom)?;
        if bytes.len() != 33 {
            return Err(E::custom("invalid compressed point length"));
        }
        let point = PublicKey::from_slice(&bytes).map_err(E::custom)?;
        Ok(CurvePoint(point))
    }
}

impl<'de> Deserialize<'de> for CurvePoint {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(CurvePointVisitor)
    }
}

impl fmt::Display for CurvePoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for BlindingFactor {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0.secret_bytes()))
    }
}

struct BlindingFactorVisitor;

impl<'de> Visitor<'de> for BlindingFactorVisitor {
    type Value = BlindingFactor;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a 64-character lowercase hex string encoding a non-zero scalar")
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
    where
        E: DeError,
    {
        let bytes = hex::decode(v).map_err(E::custom)?;
        let key = SecretKey::from_slice(&bytes).map_err(E::custom)?;
        Ok(BlindingFactor(key))
    }
}

impl<'de> Deserialize<'de> for BlindingFactor {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(BlindingFactorVisitor)
    }
}

impl Secret {
    /// The wire form of the secret: base64url without padding over the raw
    /// 32 bytes.
    pub fn encoded(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn from_encoded(v: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(v)
            .map_err(|e| WalletError::Crypto(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(WalletError::Crypto("invalid secret length".to_string()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Secret(out))
    }
}

impl Serialize for Secret {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.encoded())
    }
}

struct SecretVisitor;

impl<'de> Visitor<'de> for SecretVisitor {
    type Value = Secret;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a base64url string without padding encoding 32 bytes")
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
    where
        E: DeError,
    {
        Secret::from_encoded(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(SecretVisitor)
    }
}

pub fn random_secret<R>(rng: &mut R) -> Secret
where
    R: CryptoRng + RngCore,
{
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    Secret(bytes)
}

/// Samples a uniform scalar in [1, n) by rejection.
pub fn random_blinding_factor<R>(rng: &mut R) -> BlindingFactor
where
    R: CryptoRng + RngCore,
{
    loop {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        if let Ok(key) = SecretKey::from_slice(&bytes) {
            bytes.zeroize();
            return BlindingFactor(key);
        }
    }
}

/// Deterministically maps a byte string to a curve point with no known
/// discrete log relative to G.
///
/// Interprets SHA-256 of the message as the X coordinate of a compressed
/// point with even-Y prefix, re-hashing until the coordinate is on the
/// curve. The retry bound is unreachable in practice; hitting it means the
/// hash chain degenerated and the operation must abort.
pub fn hash_to_curve(message: &[u8]) -> Result<CurvePoint> {
    let mut digest: [u8; 32] = Sha256::digest(message).into();
    for _ in 0..HASH_TO_CURVE_MAX_ROUNDS {
        let mut candidate = [0u8; 33];
        candidate[0] = 0x02;
        candidate[1..].copy_from_slice(&digest);
        if let Ok(point) = PublicKey::from_slice(&candidate) {
            return Ok(CurvePoint(point));
        }
        digest = Sha256::digest(digest).into();
    }
    Err(WalletError::Crypto(
        "hash_to_curve exhausted retries".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn hash_to_curve_is_deterministic() {
        let a = hash_to_curve(b"test_message").unwrap();
        let b = hash_to_curve(b"test_message").unwrap();
        assert_eq!(a, b);

        let c = hash_to_curve(b"another_message").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn hash_to_curve_produces_even_y_points() {
        for msg in [&b"x"[..], b"yy", b"zzz", b""] {
            let point = hash_to_curve(msg).unwrap();
            assert_eq!(point.0.serialize()[0], 0x02);
        }
    }

    #[test]
    fn curve_point_hex_round_trip() {
        let mut rng = OsRng;
        let r = random_blinding_factor(&mut rng);
        let point = CurvePoint(PublicKey::from_secret_key(&SECP, &r.0));

        let hex_str = point.to_hex();
        assert_eq!(hex_str.len(), 66);
        assert_eq!(CurvePoint::from_hex(&hex_str).unwrap(), point);

        let json = serde_json::to_string(&point).unwrap();
        assert_eq!(json, format!("\"{hex_str}\""));
        let back: CurvePoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, point);
    }

    #[test]
    fn secret_encoding_round_trip() {
        let mut rng = OsRng;
        let secret = random_secret(&mut rng);
        let encoded = secret.encoded();
        // 32 bytes -> 43 base64url characters, no padding.
        assert_eq!(encoded.len(), 43);
        assert!(!encoded.contains('='));
        assert_eq!(Secret::from_encoded(&encoded).unwrap(), secret);
    }

    #[test]
    fn blinding_factor_serde_round_trip() {
        let mut rng = OsRng;
        let r = random_blinding_factor(&mut rng);
        let json = serde_json::to_string(&r).unwrap();
        let back: BlindingFactor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
