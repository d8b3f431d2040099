use crate::error::Result;
use crate::protocol::{
    CheckFeesRequest, CheckFeesResponse, CheckSpendableRequest, CheckSpendableResponse,
    MeltRequest, MeltResponse, MintKeys, MintRequest, PostMintResponse, RequestMintResponse,
    SplitRequest, SplitResponse,
};

/// Transport capability handed to the wallet at construction.
///
/// Every method takes the mint url so a single connector can serve the
/// wallet's own mint as well as foreign mints encountered while receiving.
/// Implementations own cancellation: a timed-out or aborted call must
/// surface `WalletError::Cancelled`.
#[async_trait::async_trait]
pub trait MintConnector: Send + Sync + 'static {
    async fn get_keys(&self, mint_url: &str) -> Result<MintKeys>;

    async fn request_mint(&self, mint_url: &str, amount: u64) -> Result<RequestMintResponse>;

    async fn mint(
        &self,
        mint_url: &str,
        request: MintRequest,
        hash: &str,
    ) -> Result<PostMintResponse>;

    async fn split(&self, mint_url: &str, request: SplitRequest) -> Result<SplitResponse>;

    async fn melt(&self, mint_url: &str, request: MeltRequest) -> Result<MeltResponse>;

    async fn check_fees(
        &self,
        mint_url: &str,
        request: CheckFeesRequest,
    ) -> Result<CheckFeesResponse>;

    async fn check_spendable(
        &self,
        mint_url: &str,
        request: CheckSpendableRequest,
    ) -> Result<CheckSpendableResponse>;
}
