//! HTTP transport for the mint contract.
//!
//! Maps the typed connector surface onto the mint's JSON endpoints:
//! `GET /keys`, `GET /mint?amount=N`, `POST /mint?hash=H`, `POST /split`,
//! `POST /melt`, `POST /checkfees`, `POST /check`.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use pocketmint_core::error::{Result, WalletError};
use pocketmint_core::mint::MintConnector;
use pocketmint_core::protocol::{
    CheckFeesRequest, CheckFeesResponse, CheckSpendableRequest, CheckSpendableResponse,
    MeltRequest, MeltResponse, MintErrorBody, MintKeys, MintRequest, PostMintResponse,
    RequestMintResponse, SplitRequest, SplitResponse,
};

#[derive(Clone, Debug)]
pub struct HttpMintConfig {
    pub timeout_secs: u64,
}

impl Default for HttpMintConfig {
    fn default() -> Self {
        HttpMintConfig { timeout_secs: 30 }
    }
}

#[derive(Clone)]
pub struct HttpMintConnector {
    client: Client,
}

impl HttpMintConnector {
    pub fn new(config: HttpMintConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WalletError::Network(e.to_string()))?;
        Ok(HttpMintConnector { client })
    }

    async fn get_json<T>(&self, url: String) -> Result<T>
    where
        T: DeserializeOwned,
    {
        debug!(%url, "GET");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;
        parse_mint_body(status, &body)
    }

    async fn post_json<B, T>(&self, url: String, request: &B) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        debug!(%url, "POST");
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;
        parse_mint_body(status, &body)
    }
}

/// A timed-out call is a cancellation from the engine's point of view;
/// everything else below the mint contract is a transport failure.
fn map_transport_error(err: reqwest::Error) -> WalletError {
    if err.is_timeout() {
        WalletError::Cancelled
    } else {
        WalletError::Network(err.to_string())
    }
}

/// Mints signal application errors through `{error|detail, code?}` bodies,
/// sometimes with a 2xx status; those take precedence over the status line.
fn parse_mint_body<T>(status: StatusCode, body: &str) -> Result<T>
where
    T: DeserializeOwned,
{
    if let Ok(error_body) = serde_json::from_str::<MintErrorBody>(body) {
        if error_body.error.is_some() || error_body.detail.is_some() {
            let detail = error_body
                .detail
                .or(error_body.error)
                .unwrap_or_default();
            return Err(WalletError::Mint {
                code: error_body.code,
                detail,
            });
        }
    }
    if !status.is_success() {
        return Err(WalletError::Mint {
            code: Some(status.as_u16() as i64),
            detail: format!("mint returned HTTP {status}"),
        });
    }
    serde_json::from_str(body)
        .map_err(|e| WalletError::Network(format!("invalid mint response: {e}")))
}

fn base_url(mint_url: &str) -> &str {
    mint_url.trim_end_matches('/')
}

#[async_trait::async_trait]
impl MintConnector for HttpMintConnector {
    async fn get_keys(&self, mint_url: &str) -> Result<MintKeys> {
        self.get_json(format!("{}/keys", base_url(mint_url))).await
    }

    async fn request_mint(&self, mint_url: &str, amount: u64) -> Result<RequestMintResponse> {
        self.get_json(format!("{}/mint?amount={amount}", base_url(mint_url)))
            .await
    }

    async fn mint(
        &self,
        mint_url: &str,
        request: MintRequest,
        hash: &str,
    ) -> Result<PostMintResponse> {
        self.post_json(format!("{}/mint?hash={hash}", base_url(mint_url)), &request)
            .await
    }

    async fn split(&self, mint_url: &str, request: SplitRequest) -> Result<SplitResponse> {
        self.post_json(format!("{}/split", base_url(mint_url)), &request)
            .await
    }

    async fn melt(&self, mint_url: &str, request: MeltRequest) -> Result<MeltResponse> {
        self.post_json(format!("{}/melt", base_url(mint_url)), &request)
            .await
    }

    async fn check_fees(
        &self,
        mint_url: &str,
        request: CheckFeesRequest,
    ) -> Result<CheckFeesResponse> {
        self.post_json(format!("{}/checkfees", base_url(mint_url)), &request)
            .await
    }

    async fn check_spendable(
        &self,
        mint_url: &str,
        request: CheckSpendableRequest,
    ) -> Result<CheckSpendableResponse> {
        self.post_json(format!("{}/check", base_url(mint_url)), &request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_application_error_even_on_2xx() {
        let err = parse_mint_body::<CheckFeesResponse>(
            StatusCode::OK,
            r#"{"error":"invoice not paid","code":402}"#,
        )
        .unwrap_err();
        match err {
            WalletError::Mint { code, detail } => {
                assert_eq!(code, Some(402));
                assert_eq!(detail, "invoice not paid");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parse_prefers_detail_over_error_field() {
        let err = parse_mint_body::<CheckFeesResponse>(
            StatusCode::BAD_REQUEST,
            r#"{"error":"short","detail":"proofs already spent"}"#,
        )
        .unwrap_err();
        match err {
            WalletError::Mint { detail, .. } => assert_eq!(detail, "proofs already spent"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parse_maps_bare_http_failure_to_mint_error() {
        let err =
            parse_mint_body::<CheckFeesResponse>(StatusCode::INTERNAL_SERVER_ERROR, "boom")
                .unwrap_err();
        assert!(matches!(err, WalletError::Mint { code: Some(500), .. }));
    }

    #[test]
    fn parse_decodes_success_body() {
        let response: CheckFeesResponse =
            parse_mint_body(StatusCode::OK, r#"{"fee":4}"#).unwrap();
        assert_eq!(response.fee, 4);
    }
}
