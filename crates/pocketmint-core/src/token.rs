use std::collections::HashSet;
use std::str::FromStr;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::protocol::{proofs_total, Proof};

/// Version tag prepended to the transport form. Decoders tolerate its
/// absence for legacy inputs.
pub const TOKEN_PREFIX: &str = "cashuA";

/// A non-empty group of proofs issued by the same mint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub mint: String,
    pub proofs: Vec<Proof>,
}

/// A transportable bundle of proofs, possibly spanning several mints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token: Vec<TokenEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl Token {
    pub fn total_amount(&self) -> u64 {
        self.token.iter().map(|entry| proofs_total(&entry.proofs)).sum()
    }
}

impl FromStr for Token {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        decode_token(s)
    }
}

/// `"cashuA" || base64url(JSON(token))`, unpadded.
pub fn encode_token(token: &Token) -> Result<String> {
    let json = serde_json::to_vec(token)?;
    Ok(format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(json)))
}

pub fn decode_token(raw: &str) -> Result<Token> {
    let body = raw.strip_prefix(TOKEN_PREFIX).unwrap_or(raw);
    let normalized = base64url_to_base64(body);
    let decoded = STANDARD
        .decode(normalized)
        .map_err(|e| WalletError::MalformedToken(format!("invalid base64: {e}")))?;
    let json = String::from_utf8(decoded)
        .map_err(|e| WalletError::MalformedToken(format!("invalid utf-8: {e}")))?;
    serde_json::from_str(&json)
        .map_err(|e| WalletError::MalformedToken(format!("invalid token json: {e}")))
}

/// Drops empty entries, coalesces entries for the same mint (first-seen
/// order), and deduplicates proofs by `(secret, C)` within each entry.
pub fn clean_token(token: Token) -> Token {
    let mut mint_order: Vec<String> = Vec::new();
    let mut merged: Vec<Vec<Proof>> = Vec::new();

    for entry in token.token {
        if entry.proofs.is_empty() {
            continue;
        }
        match mint_order.iter().position(|mint| *mint == entry.mint) {
            Some(idx) => merged[idx].extend(entry.proofs),
            None => {
                mint_order.push(entry.mint);
                merged.push(entry.proofs);
            }
        }
    }

    let entries = mint_order
        .into_iter()
        .zip(merged)
        .map(|(mint, proofs)| {
            let mut seen = HashSet::new();
            let proofs = proofs
                .into_iter()
                .filter(|p| seen.insert((p.secret.clone(), p.c)))
                .collect();
            TokenEntry { mint, proofs }
        })
        .collect();

    Token {
        token: entries,
        memo: token.memo,
    }
}

/// `-`/`_` to `+`/`/`, padded to a multiple of four. A standard-base64 input
/// passes through unchanged.
pub fn base64url_to_base64(s: &str) -> String {
    let mut out = s.replace('-', "+").replace('_', "/");
    while out.len() % 4 != 0 {
        out.push('=');
    }
    out
}

pub fn base64_to_base64url(s: &str) -> String {
    s.replace('+', "-").replace('/', "_").trim_end_matches('=').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CurvePoint;

    const POINT_A: &str = "02c020067db727d586bc3183aecf97fcb800c3f4cc4759f69c626c9db5d8f5b5d4";
    const POINT_B: &str = "02ac910bef28cbe5d7325415d5c263026f15f9b967a079ca9779ab6e5c2db133a7";

    fn proof(amount: u64, secret: &str, c_hex: &str) -> Proof {
        Proof {
            id: "DSAl9nvvyfva".to_string(),
            amount,
            secret: secret.to_string(),
            c: CurvePoint::from_hex(c_hex).unwrap(),
        }
    }

    fn sample_token() -> Token {
        Token {
            token: vec![TokenEntry {
                mint: "https://8333.space:3338".to_string(),
                proofs: vec![proof(2, "s-one", POINT_A), proof(8, "s-two", POINT_B)],
            }],
            memo: None,
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let token = sample_token();
        let encoded = encode_token(&token).unwrap();
        assert!(encoded.starts_with(TOKEN_PREFIX));
        assert!(!encoded.contains('='));
        assert_eq!(decode_token(&encoded).unwrap(), token);
    }

    #[test]
    fn decode_tolerates_missing_prefix() {
        let token = sample_token();
        let encoded = encode_token(&token).unwrap();
        let stripped = encoded.strip_prefix(TOKEN_PREFIX).unwrap();
        assert_eq!(decode_token(stripped).unwrap(), token);
    }

    #[test]
    fn decode_accepts_legacy_standard_base64() {
        // Padded standard-base64 payload with a memo, as emitted by older
        // wallets.
        let token = "cashuAeyJ0b2tlbiI6W3sibWludCI6Imh0dHBzOi8vODMzMy5zcGFjZTozMzM4IiwicHJvb2ZzIjpbeyJpZCI6IkRTQWw5bnZ2eWZ2YSIsImFtb3VudCI6Miwic2VjcmV0IjoiRWhwZW5uQzlxQjNpRmxXOEZaX3BadyIsIkMiOiIwMmMwMjAwNjdkYjcyN2Q1ODZiYzMxODNhZWNmOTdmY2I4MDBjM2Y0Y2M0NzU5ZjY5YzYyNmM5ZGI1ZDhmNWI1ZDQifSx7ImlkIjoiRFNBbDludnZ5ZnZhIiwiYW1vdW50Ijo4LCJzZWNyZXQiOiJUbVM2Q3YwWVQ1UFVfNUFUVktudWt3IiwiQyI6IjAyYWM5MTBiZWYyOGNiZTVkNzMyNTQxNWQ1YzI2MzAyNmYxNWY5Yjk2N2EwNzljYTk3NzlhYjZlNWMyZGIxMzNhNyJ9XX1dLCJtZW1vIjoiVGhhbmt5b3UuIn0=";
        let decoded = decode_token(token).unwrap();
        assert_eq!(decoded.token[0].mint, "https://8333.space:3338");
        assert_eq!(decoded.token[0].proofs.len(), 2);
        assert_eq!(decoded.token[0].proofs[1].amount, 8);
        assert_eq!(decoded.memo.as_deref(), Some("Thankyou."));
        assert_eq!(decoded.total_amount(), 10);
    }

    #[test]
    fn decode_rejects_garbage_at_every_stage() {
        // invalid base64
        assert!(matches!(
            decode_token("cashuA!!!").unwrap_err(),
            WalletError::MalformedToken(_)
        ));
        // valid base64, invalid json
        let not_json = URL_SAFE_NO_PAD.encode(b"not a token");
        assert!(matches!(
            decode_token(&format!("cashuA{not_json}")).unwrap_err(),
            WalletError::MalformedToken(_)
        ));
        // valid json, wrong shape
        let wrong_shape = URL_SAFE_NO_PAD.encode(b"{\"tokens\":[]}");
        assert!(matches!(
            decode_token(&format!("cashuA{wrong_shape}")).unwrap_err(),
            WalletError::MalformedToken(_)
        ));
    }

    #[test]
    fn base64url_helpers_are_inverses_modulo_padding() {
        // unpadded url-safe inputs survive a round trip through standard form
        for sample in ["", "Zg", "Zm8", "Zm9v", "a-b_c"] {
            let std_form = base64url_to_base64(sample);
            assert_eq!(std_form.len() % 4, 0);
            assert_eq!(base64_to_base64url(&std_form), sample);
        }
        // padded standard inputs survive a round trip through url-safe form
        for sample in ["Zg==", "Zm8=", "Zm9v", "+A/B"] {
            let url_form = base64_to_base64url(sample);
            assert!(!url_form.contains('='));
            assert_eq!(base64url_to_base64(&url_form), sample);
        }
    }

    #[test]
    fn clean_token_drops_coalesces_and_dedupes() {
        let mint_a = "https://mint-a.example".to_string();
        let mint_b = "https://mint-b.example".to_string();
        let token = Token {
            token: vec![
                TokenEntry {
                    mint: mint_a.clone(),
                    proofs: vec![proof(2, "alpha", POINT_A)],
                },
                TokenEntry {
                    mint: mint_b.clone(),
                    proofs: vec![],
                },
                TokenEntry {
                    mint: mint_b.clone(),
                    proofs: vec![proof(4, "beta", POINT_B)],
                },
                TokenEntry {
                    mint: mint_a.clone(),
                    proofs: vec![proof(2, "alpha", POINT_A), proof(8, "gamma", POINT_B)],
                },
            ],
            memo: None,
        };

        let cleaned = clean_token(token);
        assert_eq!(cleaned.token.len(), 2);
        assert_eq!(cleaned.token[0].mint, mint_a);
        assert_eq!(cleaned.token[1].mint, mint_b);
        // duplicate (secret, C) collapsed, distinct secrets kept
        let amounts: Vec<u64> = cleaned.token[0].proofs.iter().map(|p| p.amount).collect();
        assert_eq!(amounts, vec![2, 8]);
        assert_eq!(cleaned.token[1].proofs.len(), 1);
    }
}
