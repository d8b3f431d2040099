use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("insufficient funds: {available} sat available, {required} sat required")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("keyset has no key for amount {amount}")]
    InvalidKeyset { amount: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("mint error: {detail}")]
    Mint { code: Option<i64>, detail: String },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] std::io::Error),
}

impl WalletError {
    pub fn mint(detail: impl Into<String>) -> Self {
        WalletError::Mint {
            code: None,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;
