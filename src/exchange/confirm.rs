//! Signature confirmation and failure classification

use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use tracing::{debug, warn};

use crate::exchange::rpc::ChainRpc;
use crate::resilience::{
    classify_onchain, poll_until, CallClass, Check, ErrorKind, PollOutcome, PollSpec,
    ResilienceState,
};

/// Result of waiting for a sent transaction
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    /// Reached the requested commitment without error
    Landed,
    /// Executed and failed on-chain
    Failed(String),
    /// Not seen at the requested commitment before the deadline
    Unconfirmed,
}

/// Poll the signature status until it lands, fails, or the wait times out
pub async fn await_confirmation(
    rpc: &dyn ChainRpc,
    state: &ResilienceState,
    sig: &Signature,
    spec: PollSpec,
) -> Confirmation {
    let outcome = poll_until(spec, move || async move {
        match state.call_once(CallClass::Rpc, rpc.signature_state(sig)).await {
            Ok(Some(status)) => match status.err {
                Some(err) => Check::Done(Confirmation::Failed(err)),
                None if status.reached => Check::Done(Confirmation::Landed),
                None => Check::Pending(None),
            },
            Ok(None) => Check::Pending(None),
            Err(e) => {
                debug!(%sig, "signature status lookup failed: {}", e);
                Check::Pending(None)
            }
        }
    })
    .await;

    match outcome {
        PollOutcome::Ready(confirmation) => confirmation,
        PollOutcome::TimedOut(_) => {
            warn!(%sig, "confirmation timed out");
            Confirmation::Unconfirmed
        }
    }
}

/// Reduce a failed or unconfirmed send to an error kind.
///
/// Clear on-chain codes are classified directly. Ambiguous failures are
/// re-simulated (when the endpoint allows it) so dust-routing program errors
/// can be told apart from ordinary slippage.
pub async fn classify_failure(
    rpc: &dyn ChainRpc,
    state: &ResilienceState,
    tx: &VersionedTransaction,
    onchain_err: Option<&str>,
) -> (ErrorKind, String) {
    if let Some(err) = onchain_err {
        let kind = classify_onchain(err, &[]);
        if kind != ErrorKind::SendFail {
            return (kind, err.to_string());
        }
    }

    match state.call_once(CallClass::Rpc, rpc.simulate(tx)).await {
        Ok(Some(sim)) => match sim.err {
            Some(err) => (classify_onchain(&err, &sim.logs), err),
            // Simulates clean now: the original most likely expired
            None if onchain_err.is_none() => (
                ErrorKind::Blockhash,
                "not confirmed before blockhash expiry".to_string(),
            ),
            None => (
                ErrorKind::SendFail,
                onchain_err.unwrap_or_default().to_string(),
            ),
        },
        Ok(None) => (
            ErrorKind::SendFail,
            onchain_err.unwrap_or("unconfirmed").to_string(),
        ),
        Err(e) => {
            debug!("classification simulate failed: {}", e);
            (
                ErrorKind::SendFail,
                onchain_err.unwrap_or("unconfirmed").to_string(),
            )
        }
    }
}

/// Settle a send that timed out unconfirmed.
///
/// An expired-blockhash verdict is only returned once a final status
/// lookup still shows nothing; a signature seen executing without error
/// counts as landed so the sell is not submitted twice.
pub async fn resolve_unconfirmed(
    rpc: &dyn ChainRpc,
    state: &ResilienceState,
    sig: &Signature,
    tx: &VersionedTransaction,
) -> std::result::Result<(), (ErrorKind, String)> {
    let (kind, message) = classify_failure(rpc, state, tx, None).await;
    if kind != ErrorKind::Blockhash {
        return Err((kind, message));
    }
    match state.call_once(CallClass::Rpc, rpc.signature_state(sig)).await {
        Ok(Some(status)) => match status.err {
            None => {
                warn!(%sig, "transaction landed after the confirmation wait");
                Ok(())
            }
            Some(err) => Err(classify_failure(rpc, state, tx, Some(&err)).await),
        },
        Ok(None) => Err((kind, message)),
        Err(e) => {
            debug!(%sig, "final status lookup failed: {}", e);
            Err((kind, message))
        }
    }
}
