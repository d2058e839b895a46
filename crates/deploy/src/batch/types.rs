//! Inputs of a batch run and the deploy collaborator boundary.

use std::{fmt, future::Future, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    allocation::{NormalizedRecipient, RewardRecipient},
    error::OperationError,
    resilience::BackoffKind,
};

/// Default creator fee, in percent.
pub const DEFAULT_FEE_PERCENTAGE: f64 = 1.0;

/// Target chain of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Chain {
    #[default]
    Base,
    BaseSepolia,
    Mainnet,
    Sepolia,
    Arbitrum,
    Custom(u64),
}

impl Chain {
    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Base => 8453,
            Chain::BaseSepolia => 84532,
            Chain::Mainnet => 1,
            Chain::Sepolia => 11155111,
            Chain::Arbitrum => 42161,
            Chain::Custom(id) => *id,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::Base => write!(f, "base"),
            Chain::BaseSepolia => write!(f, "base-sepolia"),
            Chain::Mainnet => write!(f, "mainnet"),
            Chain::Sepolia => write!(f, "sepolia"),
            Chain::Arbitrum => write!(f, "arbitrum"),
            Chain::Custom(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base" => Ok(Chain::Base),
            "base-sepolia" => Ok(Chain::BaseSepolia),
            "mainnet" => Ok(Chain::Mainnet),
            "sepolia" => Ok(Chain::Sepolia),
            "arbitrum" => Ok(Chain::Arbitrum),
            other => other
                .parse::<u64>()
                .map(Chain::Custom)
                .map_err(|_| format!("unknown chain '{}'", s)),
        }
    }
}

impl From<Chain> for String {
    fn from(chain: Chain) -> Self {
        chain.to_string()
    }
}

impl TryFrom<String> for Chain {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Optional descriptive fields forwarded to the deploy collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub social_urls: Vec<String>,
}

/// One element of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Caller-supplied id echoed back in the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TokenMetadata>,
    /// Overrides the batch default admin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,
    /// Overrides the batch default reward recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_recipient: Option<String>,
    /// Split rewards between several recipients.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rewards: Vec<RewardRecipient>,
}

impl BatchItem {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            ..Default::default()
        }
    }
}

/// Settings of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    pub chain: Chain,
    /// Address of the wallet sending the deployments; last-resort admin.
    pub wallet_address: String,
    pub default_admin: Option<String>,
    pub default_recipient: Option<String>,
    pub fee_percentage: f64,
    /// Pause between two items.
    #[serde(with = "crate::resilience::millis")]
    pub delay: Duration,
    /// Retries per item after the first attempt.
    pub retries: u32,
    /// Base delay between attempts of one item.
    #[serde(with = "crate::resilience::millis")]
    pub retry_delay: Duration,
    pub retry_backoff: BackoffKind,
    #[serde(with = "crate::resilience::millis")]
    pub max_retry_delay: Duration,
    /// First index to process, for resuming an interrupted run.
    pub start_index: usize,
    /// Keep going after an item exhausted its retries.
    pub continue_on_error: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            chain: Chain::default(),
            wallet_address: String::new(),
            default_admin: None,
            default_recipient: None,
            fee_percentage: DEFAULT_FEE_PERCENTAGE,
            delay: Duration::from_secs(2),
            retries: 2,
            retry_delay: Duration::from_secs(5),
            retry_backoff: BackoffKind::Fixed,
            max_retry_delay: Duration::from_secs(60),
            start_index: 0,
            continue_on_error: true,
        }
    }
}

/// Fully resolved input of one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRequest {
    pub chain: Chain,
    pub name: String,
    pub symbol: String,
    pub image: Option<String>,
    pub metadata: Option<TokenMetadata>,
    pub admin: String,
    pub rewards: Vec<NormalizedRecipient>,
    pub fee_percentage: f64,
}

/// What a successful deployment returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReceipt {
    pub address: String,
    pub tx_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
}

/// The remote operation that creates one resource.
///
/// Implementations should attach the most precise [`crate::ErrorKind`] they can;
/// the batch sequencer retries every failure regardless of kind.
pub trait TokenDeployer: Send + Sync {
    fn deploy(
        &self,
        request: &DeployRequest,
    ) -> impl Future<Output = Result<DeployReceipt, OperationError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_round_trip() {
        for chain in [Chain::Base, Chain::BaseSepolia, Chain::Arbitrum, Chain::Custom(31337)] {
            assert_eq!(chain.to_string().parse::<Chain>(), Ok(chain));
        }
        assert_eq!("BASE".parse::<Chain>(), Ok(Chain::Base));
        assert!("nope".parse::<Chain>().is_err());
        assert_eq!(Chain::Custom(7).chain_id(), 7);
    }

    #[test]
    fn test_chain_serializes_as_string() {
        assert_eq!(serde_json::to_string(&Chain::BaseSepolia).unwrap(), "\"base-sepolia\"");
        let chain: Chain = serde_json::from_str("\"31337\"").unwrap();
        assert_eq!(chain, Chain::Custom(31337));
    }

    #[test]
    fn test_item_minimal_json() {
        let item: BatchItem = serde_json::from_str(r#"{"name":"Kup","symbol":"KUP"}"#).unwrap();
        assert_eq!(item, BatchItem::new("Kup", "KUP"));
    }

    #[test]
    fn test_options_partial_json_keeps_defaults() {
        let options: BatchOptions =
            serde_json::from_str(r#"{"retries":5,"delay":250,"continue_on_error":false}"#).unwrap();
        assert_eq!(options.retries, 5);
        assert_eq!(options.delay, Duration::from_millis(250));
        assert!(!options.continue_on_error);
        assert_eq!(options.retry_delay, BatchOptions::default().retry_delay);
    }
}
