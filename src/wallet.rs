//! Wallet sign-in: account request, challenge message, personal signature.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// EIP-1193 "User Rejected Request".
pub const USER_REJECTED_CODE: i64 = 4001;

/// Failures reported by a wallet provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    /// No wallet extension is installed or reachable.
    #[error("wallet unavailable")]
    Unavailable,

    /// The user refused the request in the wallet UI.
    #[error("user rejected the request")]
    Declined,

    #[error("wallet request failed ({code}): {message}")]
    Rpc { code: i64, message: String },
}

impl WalletError {
    /// Classify an EIP-1193 provider error.
    #[must_use]
    pub fn from_rpc(code: i64, message: impl Into<String>) -> Self {
        if code == USER_REJECTED_CODE {
            Self::Declined
        } else {
            Self::Rpc {
                code,
                message: message.into(),
            }
        }
    }
}

impl From<WalletError> for Error {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::Unavailable => Self::WalletUnavailable,
            WalletError::Declined => Self::UserDeclined,
            WalletError::Rpc { .. } => Self::Wallet(e.to_string()),
        }
    }
}

/// Consumer-provided bridge to an Ethereum wallet.
///
/// Mirrors the two EIP-1193 calls the sign-in needs:
/// `eth_requestAccounts` and `personal_sign`.
pub trait WalletProvider: Send + Sync {
    /// Request account access. The first account is used.
    fn request_accounts(&self) -> impl Future<Output = Result<Vec<String>, WalletError>> + Send;

    /// Sign `message` with the key behind `address`.
    fn personal_sign(
        &self,
        message: &str,
        address: &str,
    ) -> impl Future<Output = Result<String, WalletError>> + Send;
}

/// The signed challenge posted to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSignature {
    pub address: String,
    pub message: String,
    pub signature: String,
}

/// Human-readable challenge bound to one address and one point in time.
#[must_use]
pub fn challenge_message(address: &str, nonce_millis: i128) -> String {
    format!(
        "Welcome to Anoma Testnet! Sign this message to authenticate with your wallet. \
         Address: {address} Nonce: {nonce_millis}"
    )
}

/// The wallet's first account, the one it reports as selected.
///
/// Later accounts are never used, even when the first one is empty.
///
/// # Errors
///
/// [`Error::WalletUnavailable`] if there is no wallet or its first account is
/// missing or empty, [`Error::UserDeclined`] if the user refuses.
pub async fn request_address<W: WalletProvider>(wallet: &W) -> Result<String, Error> {
    let accounts = wallet.request_accounts().await?;
    accounts
        .into_iter()
        .next()
        .filter(|a| !a.is_empty())
        .ok_or(Error::WalletUnavailable)
}

/// Run the wallet side of the sign-in: pick an account, build a fresh
/// challenge and have the wallet sign it.
///
/// Refusals are returned as-is and never retried.
///
/// # Errors
///
/// See [`request_address`]; signing failures map the same way.
pub async fn sign_challenge<W: WalletProvider>(wallet: &W) -> Result<WalletSignature, Error> {
    let address = request_address(wallet).await?;

    let nonce = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let message = challenge_message(&address, nonce);

    let signature = wallet.personal_sign(&message, &address).await?;
    tracing::debug!(address = %address, "Challenge signed");

    Ok(WalletSignature {
        address,
        message,
        signature,
    })
}
