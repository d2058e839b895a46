//! Offline stand-in for a real token factory.

use std::{
    collections::HashSet,
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

use mintbatch_deploy::{Chain, DeployReceipt, DeployRequest, OperationError, TokenDeployer};
use sha2::{Digest, Sha256};

/// Deploys nothing, returning receipts derived from the request.
///
/// Addresses only depend on the request, so re-running a batch yields the
/// same addresses. Transaction hashes also mix in a call counter.
#[derive(Debug, Default)]
pub struct DryRunDeployer {
    fail_symbols: HashSet<String>,
    calls: AtomicU64,
}

impl DryRunDeployer {
    /// Fail every deployment whose symbol is in `symbols`, case-insensitively.
    pub fn failing<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fail_symbols: symbols
                .into_iter()
                .map(|s| s.as_ref().to_ascii_uppercase())
                .collect(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl TokenDeployer for DryRunDeployer {
    fn deploy(
        &self,
        request: &DeployRequest,
    ) -> impl Future<Output = Result<DeployReceipt, OperationError>> + Send {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);

        let outcome = if self.fail_symbols.contains(&request.symbol.to_ascii_uppercase()) {
            Err(OperationError::server(format!(
                "dry run: simulated failure for {}",
                request.symbol
            )))
        } else {
            Ok(receipt(request, call))
        };

        std::future::ready(outcome)
    }
}

fn receipt(request: &DeployRequest, call: u64) -> DeployReceipt {
    let mut hasher = Sha256::new();
    hasher.update(request.chain.chain_id().to_be_bytes());
    hasher.update(request.name.as_bytes());
    hasher.update(request.symbol.as_bytes());
    hasher.update(request.admin.to_ascii_lowercase().as_bytes());
    let digest = hasher.finalize();
    let address = format!("0x{}", hex::encode(&digest[12..]));

    let mut hasher = Sha256::new();
    hasher.update(digest);
    hasher.update(call.to_be_bytes());
    let tx_hash = format!("0x{}", hex::encode(hasher.finalize()));

    let explorer_url = explorer(request.chain).map(|base| format!("{}/token/{}", base, address));

    DeployReceipt {
        address,
        tx_hash,
        explorer_url,
    }
}

fn explorer(chain: Chain) -> Option<&'static str> {
    match chain {
        Chain::Base => Some("https://basescan.org"),
        Chain::BaseSepolia => Some("https://sepolia.basescan.org"),
        Chain::Mainnet => Some("https://etherscan.io"),
        Chain::Sepolia => Some("https://sepolia.etherscan.io"),
        Chain::Arbitrum => Some("https://arbiscan.io"),
        Chain::Custom(_) => None,
    }
}
