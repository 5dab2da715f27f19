//! Chain RPC access
//!
//! The exchange client and the pipeline only talk to the chain through
//! [`ChainRpc`]; [`SolanaRpc`] implements it over the nonblocking
//! `solana-client`.

use async_trait::async_trait;
use solana_account_decoder::UiAccountData;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig};
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use solana_transaction_status::TransactionStatus;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::config::RpcConfig;
use crate::error::{Error, Result};

/// Token account owned by the trader
#[derive(Debug, Clone, PartialEq)]
pub struct TokenAccount {
    pub address: Pubkey,
    /// Token program owning the account (classic or 2022)
    pub program_id: Pubkey,
    pub amount: u64,
    pub decimals: u8,
}

/// Signature status at the requested commitment
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureState {
    /// On-chain execution error, if the transaction failed
    pub err: Option<String>,
    /// Commitment level reached
    pub reached: bool,
}

/// Simulation outcome
#[derive(Debug, Clone, PartialEq)]
pub struct Simulation {
    pub err: Option<String>,
    pub logs: Vec<String>,
}

fn signature_state(status: TransactionStatus, commitment: CommitmentConfig) -> SignatureState {
    SignatureState {
        reached: status.satisfies_commitment(commitment),
        err: status.err.map(|e| e.to_string()),
    }
}

/// Chain reads and writes consumed by the engine
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn sol_balance(&self, owner: &Pubkey) -> Result<u64>;
    async fn token_accounts(&self, owner: &Pubkey, mint: &Pubkey) -> Result<Vec<TokenAccount>>;
    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>>;
    async fn latest_blockhash(&self) -> Result<Hash>;
    async fn send_transaction(&self, tx: &VersionedTransaction) -> Result<Signature>;
    async fn signature_state(&self, sig: &Signature) -> Result<Option<SignatureState>>;
    /// `None` when the endpoint does not offer simulation
    async fn simulate(&self, tx: &VersionedTransaction) -> Result<Option<Simulation>>;

    /// Total raw balance of `mint` across the owner's token accounts
    async fn token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Result<u64> {
        Ok(self
            .token_accounts(owner, mint)
            .await?
            .iter()
            .map(|a| a.amount)
            .sum())
    }
}

/// Parse a commitment name, defaulting to confirmed
pub fn parse_commitment(name: &str) -> CommitmentConfig {
    let commitment = match name.to_ascii_lowercase().as_str() {
        "processed" => CommitmentLevel::Processed,
        "finalized" => CommitmentLevel::Finalized,
        _ => CommitmentLevel::Confirmed,
    };
    CommitmentConfig { commitment }
}

/// `ChainRpc` over a JSON-RPC endpoint
pub struct SolanaRpc {
    client: RpcClient,
    commitment: CommitmentConfig,
    simulation_enabled: bool,
}

impl SolanaRpc {
    pub fn new(config: &RpcConfig) -> Self {
        let commitment = parse_commitment(&config.commitment);
        Self {
            client: RpcClient::new_with_timeout_and_commitment(
                config.endpoint.clone(),
                Duration::from_millis(config.timeout_ms),
                commitment,
            ),
            commitment,
            simulation_enabled: config.simulation_enabled,
        }
    }
}

#[async_trait]
impl ChainRpc for SolanaRpc {
    async fn sol_balance(&self, owner: &Pubkey) -> Result<u64> {
        Ok(self.client.get_balance(owner).await?)
    }

    async fn token_accounts(&self, owner: &Pubkey, mint: &Pubkey) -> Result<Vec<TokenAccount>> {
        let keyed = self
            .client
            .get_token_accounts_by_owner(owner, TokenAccountsFilter::Mint(*mint))
            .await?;

        let mut accounts = Vec::with_capacity(keyed.len());
        for entry in keyed {
            let UiAccountData::Json(parsed) = &entry.account.data else {
                debug!(account = %entry.pubkey, "skipping non-parsed token account");
                continue;
            };
            let amount_info = &parsed.parsed["info"]["tokenAmount"];
            let amount = amount_info["amount"]
                .as_str()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);
            let decimals = amount_info["decimals"].as_u64().unwrap_or(0) as u8;
            let address = Pubkey::from_str(&entry.pubkey)
                .map_err(|e| Error::Deserialization(format!("token account key: {}", e)))?;
            let program_id = Pubkey::from_str(&entry.account.owner)
                .map_err(|e| Error::Deserialization(format!("token program key: {}", e)))?;
            accounts.push(TokenAccount {
                address,
                program_id,
                amount,
                decimals,
            });
        }
        Ok(accounts)
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await?;
        Ok(response.value.map(|account| account.data))
    }

    async fn latest_blockhash(&self) -> Result<Hash> {
        Ok(self.client.get_latest_blockhash().await?)
    }

    async fn send_transaction(&self, tx: &VersionedTransaction) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            max_retries: Some(0),
            preflight_commitment: Some(self.commitment.commitment),
            ..Default::default()
        };
        Ok(self.client.send_transaction_with_config(tx, config).await?)
    }

    async fn signature_state(&self, sig: &Signature) -> Result<Option<SignatureState>> {
        let statuses = self.client.get_signature_statuses(&[*sig]).await?.value;
        Ok(statuses
            .into_iter()
            .next()
            .flatten()
            .map(|status| signature_state(status, self.commitment)))
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<Option<Simulation>> {
        if !self.simulation_enabled {
            return Ok(None);
        }
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: true,
            commitment: Some(self.commitment),
            ..Default::default()
        };
        let result = self
            .client
            .simulate_transaction_with_config(tx, config)
            .await?
            .value;
        Ok(Some(Simulation {
            err: result.err.map(|e| e.to_string()),
            logs: result.logs.unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::transaction::TransactionError;
    use solana_transaction_status::TransactionConfirmationStatus;

    #[test]
    fn test_parse_commitment() {
        assert_eq!(
            parse_commitment("finalized").commitment,
            CommitmentLevel::Finalized
        );
        assert_eq!(
            parse_commitment("Processed").commitment,
            CommitmentLevel::Processed
        );
        assert_eq!(
            parse_commitment("whatever").commitment,
            CommitmentLevel::Confirmed
        );
    }

    fn status(level: TransactionConfirmationStatus, err: Option<TransactionError>) -> TransactionStatus {
        TransactionStatus {
            slot: 1,
            confirmations: Some(1),
            status: err.clone().map_or(Ok(()), Err),
            err,
            confirmation_status: Some(level),
        }
    }

    #[test]
    fn test_signature_state_tracks_commitment() {
        let confirmed = status(TransactionConfirmationStatus::Confirmed, None);
        assert!(signature_state(confirmed.clone(), CommitmentConfig::confirmed()).reached);
        assert!(!signature_state(confirmed, CommitmentConfig::finalized()).reached);

        let processed = status(TransactionConfirmationStatus::Processed, None);
        assert!(!signature_state(processed, CommitmentConfig::confirmed()).reached);
    }

    #[test]
    fn test_signature_state_carries_error() {
        let failed = status(
            TransactionConfirmationStatus::Confirmed,
            Some(TransactionError::AccountNotFound),
        );
        let state = signature_state(failed, CommitmentConfig::confirmed());
        assert!(state.reached);
        assert!(state.err.is_some());
    }
}
