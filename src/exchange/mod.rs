//! Exchange client - quotes and tiered swap execution
//!
//! Talks to an aggregator router over HTTP and to the chain over RPC:
//! - `router` - quote / swap / swap-instructions endpoints
//! - `rpc` - balances, token accounts, send, status, simulate
//! - `client` - the tiered buy/sell state machine

pub mod client;
pub mod confirm;
pub mod fees;
pub mod router;
pub mod rpc;
pub mod signer;
pub mod tx;
pub mod types;

pub use client::{BuyRequest, ExchangeClient, SellRequest};
pub use router::{JupiterHttp, RouterApi};
pub use rpc::{ChainRpc, SolanaRpc, TokenAccount};
pub use signer::{load_keypair, TradeSigner};
pub use types::{Quote, QuoteRequest, Side, SwapResult, SwapTier, WSOL_MINT};
