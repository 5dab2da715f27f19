//! Aggregator router HTTP client
//!
//! Three endpoints: `/quote`, `/swap` (assembled transaction) and
//! `/swap-instructions` (raw instructions for local compilation).

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::RouterConfig;
use crate::error::{Error, Result};
use crate::exchange::types::{Quote, QuoteRequest, SwapInstructions, SwapRequest, SwapResponse};

/// Quote/swap interface consumed by the exchange client
#[async_trait]
pub trait RouterApi: Send + Sync {
    async fn quote(&self, req: &QuoteRequest) -> Result<Quote>;
    async fn swap(&self, req: &SwapRequest) -> Result<SwapResponse>;
    async fn swap_instructions(&self, req: &SwapRequest) -> Result<SwapInstructions>;
}

/// Jupiter-compatible router over HTTP
pub struct JupiterHttp {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl JupiterHttp {
    pub fn new(config: &RouterConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("router client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: (!config.api_key.is_empty()).then(|| config.api_key.clone()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn with_key(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    /// Turn a non-success response into `RouterHttp` with the body's error text
    async fn check(response: Response) -> Result<Value> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|e| Error::Deserialization(format!("router response: {}", e)));
        }
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .or_else(|| v.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or(body);
        Err(Error::RouterHttp {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RouterApi for JupiterHttp {
    async fn quote(&self, req: &QuoteRequest) -> Result<Quote> {
        debug!(
            input = %req.input_mint,
            output = %req.output_mint,
            amount = req.amount,
            slippage_bps = req.slippage_bps,
            restrict = req.restrict_intermediate,
            "requesting quote"
        );
        let response = self
            .with_key(self.client.get(self.url("quote")).query(&req.query()))
            .send()
            .await?;
        Quote::from_value(Self::check(response).await?)
    }

    async fn swap(&self, req: &SwapRequest) -> Result<SwapResponse> {
        let response = self
            .with_key(self.client.post(self.url("swap")).json(req))
            .send()
            .await?;
        let body = Self::check(response).await?;
        let swap: SwapResponse = serde_json::from_value(body)
            .map_err(|e| Error::Deserialization(format!("swap response: {}", e)))?;
        if let Some(sim) = &swap.simulation_error {
            if !sim.is_null() {
                return Err(Error::Router(format!("swap simulation error: {}", sim)));
            }
        }
        Ok(swap)
    }

    async fn swap_instructions(&self, req: &SwapRequest) -> Result<SwapInstructions> {
        let response = self
            .with_key(self.client.post(self.url("swap-instructions")).json(req))
            .send()
            .await?;
        let body = Self::check(response).await?;
        serde_json::from_value(body)
            .map_err(|e| Error::Deserialization(format!("swap-instructions response: {}", e)))
    }
}
