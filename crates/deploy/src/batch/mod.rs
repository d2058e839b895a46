//! Sequential batch deployment.
//!
//! [`BatchDeployer`] drives a [`TokenDeployer`] over up to
//! [`MAX_BATCH_SIZE`](crate::MAX_BATCH_SIZE) items, strictly one at a time and in
//! index order. Each item gets its own bounded retry loop; failures are recorded
//! in the [`BatchSummary`] instead of aborting the run, unless
//! `continue_on_error` is off. A run can be resumed with `start_index`, or its
//! failed items replayed with [`BatchDeployer::retry_failed`].

mod summary;
mod types;

pub use summary::{BatchItemResult, BatchSummary, format_duration};
pub use types::{
    BatchItem, BatchOptions, Chain, DEFAULT_FEE_PERCENTAGE, DeployReceipt, DeployRequest,
    TokenDeployer, TokenMetadata,
};

use crate::{
    allocation::{self, is_valid_address},
    clock::{Clock, SystemClock},
    error::{BatchError, MAX_BATCH_SIZE, OperationError},
    resilience::BackoffPolicy,
};

/// Progress after an item finished, successfully or not.
#[derive(Debug)]
pub struct BatchProgress<'a> {
    /// Items finished so far in this run, including this one.
    pub completed: usize,
    /// Items scheduled for this run.
    pub total: usize,
    pub result: &'a BatchItemResult,
}

/// A failed attempt of one item.
#[derive(Debug)]
pub struct ItemFailure<'a> {
    pub index: usize,
    /// 1-based attempt number.
    pub attempt: u32,
    pub error: &'a OperationError,
}

/// An upcoming retry of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryNotice {
    pub index: usize,
    /// 1-based retry number.
    pub retry: u32,
    pub max_retries: u32,
}

type ProgressHook<'a> = Box<dyn FnMut(&BatchProgress<'_>) -> anyhow::Result<()> + Send + 'a>;
type ErrorHook<'a> = Box<dyn FnMut(&ItemFailure<'_>) -> anyhow::Result<()> + Send + 'a>;
type RetryHook<'a> = Box<dyn FnMut(RetryNotice) -> anyhow::Result<()> + Send + 'a>;

/// Callbacks invoked inline by the sequencer.
///
/// Hooks must be `Send` so a batch can run on a spawned task.
///
/// An `Err` from any hook stops the run and is returned as
/// [`BatchError::Callback`].
#[derive(Default)]
pub struct BatchHooks<'a> {
    on_progress: Option<ProgressHook<'a>>,
    on_error: Option<ErrorHook<'a>>,
    on_retry: Option<RetryHook<'a>>,
}

impl<'a> BatchHooks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(
        mut self,
        hook: impl FnMut(&BatchProgress<'_>) -> anyhow::Result<()> + Send + 'a,
    ) -> Self {
        self.on_progress = Some(Box::new(hook));
        self
    }

    pub fn on_error(
        mut self,
        hook: impl FnMut(&ItemFailure<'_>) -> anyhow::Result<()> + Send + 'a,
    ) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn on_retry(
        mut self,
        hook: impl FnMut(RetryNotice) -> anyhow::Result<()> + Send + 'a,
    ) -> Self {
        self.on_retry = Some(Box::new(hook));
        self
    }
}

impl BatchHooks<'_> {
    fn notify_progress(&mut self, progress: &BatchProgress<'_>) -> Result<(), BatchError> {
        match self.on_progress.as_mut() {
            Some(hook) => hook(progress).map_err(BatchError::Callback),
            None => Ok(()),
        }
    }

    fn notify_error(&mut self, failure: &ItemFailure<'_>) -> Result<(), BatchError> {
        match self.on_error.as_mut() {
            Some(hook) => hook(failure).map_err(BatchError::Callback),
            None => Ok(()),
        }
    }

    fn notify_retry(&mut self, notice: RetryNotice) -> Result<(), BatchError> {
        match self.on_retry.as_mut() {
            Some(hook) => hook(notice).map_err(BatchError::Callback),
            None => Ok(()),
        }
    }
}

/// Runs batches of deployments against a [`TokenDeployer`].
#[derive(Debug)]
pub struct BatchDeployer<D, C = SystemClock> {
    deployer: D,
    clock: C,
}

impl<D: TokenDeployer> BatchDeployer<D> {
    pub fn new(deployer: D) -> Self {
        Self::with_clock(deployer, SystemClock)
    }
}

impl<D: TokenDeployer, C: Clock> BatchDeployer<D, C> {
    pub fn with_clock(deployer: D, clock: C) -> Self {
        Self { deployer, clock }
    }

    pub fn deployer(&self) -> &D {
        &self.deployer
    }

    /// Deploy `items` in order, starting at `options.start_index`.
    ///
    /// Fails before doing anything if `items` is empty or larger than
    /// [`MAX_BATCH_SIZE`]. Per-item failures end up in the summary.
    pub async fn deploy(
        &self,
        items: &[BatchItem],
        options: &BatchOptions,
    ) -> Result<BatchSummary, BatchError> {
        self.deploy_with_hooks(items, options, &mut BatchHooks::default())
            .await
    }

    /// Same as [`Self::deploy`], reporting through `hooks`.
    pub async fn deploy_with_hooks(
        &self,
        items: &[BatchItem],
        options: &BatchOptions,
        hooks: &mut BatchHooks<'_>,
    ) -> Result<BatchSummary, BatchError> {
        check_batch_size(items.len())?;

        if options.start_index >= items.len() {
            tracing::warn!(
                start_index = options.start_index,
                items = items.len(),
                "Start index is past the last item, nothing to deploy"
            );
        }

        let entries = items
            .iter()
            .enumerate()
            .skip(options.start_index)
            .collect();

        self.run(entries, options, hooks).await
    }

    /// Deploy again the items that failed in `summary`.
    ///
    /// `items` must be the list the summary was produced from; results keep
    /// their original indices. The new summary only covers the replayed items
    /// and is not merged with the previous one. `options.start_index` is ignored.
    pub async fn retry_failed(
        &self,
        summary: &BatchSummary,
        items: &[BatchItem],
        options: &BatchOptions,
    ) -> Result<BatchSummary, BatchError> {
        self.retry_failed_with_hooks(summary, items, options, &mut BatchHooks::default())
            .await
    }

    /// Same as [`Self::retry_failed`], reporting through `hooks`.
    pub async fn retry_failed_with_hooks(
        &self,
        summary: &BatchSummary,
        items: &[BatchItem],
        options: &BatchOptions,
        hooks: &mut BatchHooks<'_>,
    ) -> Result<BatchSummary, BatchError> {
        check_batch_size(items.len())?;

        let entries: Vec<(usize, &BatchItem)> = summary
            .failed_indices()
            .into_iter()
            .filter_map(|index| match items.get(index) {
                Some(item) => Some((index, item)),
                None => {
                    tracing::warn!(index, items = items.len(), "Failed index not found in items, skipping");
                    None
                }
            })
            .collect();

        if entries.is_empty() {
            return Err(BatchError::EmptyBatch);
        }

        tracing::info!(count = entries.len(), "Retrying failed items...");
        self.run(entries, options, hooks).await
    }

    async fn run(
        &self,
        entries: Vec<(usize, &BatchItem)>,
        options: &BatchOptions,
        hooks: &mut BatchHooks<'_>,
    ) -> Result<BatchSummary, BatchError> {
        let started_at = self.clock.now();
        let total = entries.len();
        let backoff = BackoffPolicy::new(
            options.retry_backoff,
            options.retry_delay,
            options.max_retry_delay,
        )
        .without_jitter();

        tracing::info!(
            chain = %options.chain,
            total,
            retries = options.retries,
            continue_on_error = options.continue_on_error,
            "Starting batch deployment..."
        );

        let mut results: Vec<BatchItemResult> = Vec::with_capacity(total);

        for (position, (index, item)) in entries.into_iter().enumerate() {
            let result = self.deploy_item(index, item, options, &backoff, hooks).await?;
            let failed = !result.success;
            results.push(result);

            hooks.notify_progress(&BatchProgress {
                completed: results.len(),
                total,
                result: &results[results.len() - 1],
            })?;

            if failed && !options.continue_on_error {
                tracing::warn!(index, "Item failed and continue_on_error is off, stopping batch");
                break;
            }

            if position + 1 < total {
                self.clock.sleep(options.delay).await;
            }
        }

        let summary = BatchSummary::new(options.chain, total, results, started_at, self.clock.now());

        tracing::info!(
            success = summary.success,
            failed = summary.failed,
            total = summary.total,
            duration = %summary.format_duration(),
            "Batch deployment finished"
        );

        Ok(summary)
    }

    async fn deploy_item(
        &self,
        index: usize,
        item: &BatchItem,
        options: &BatchOptions,
        backoff: &BackoffPolicy,
        hooks: &mut BatchHooks<'_>,
    ) -> Result<BatchItemResult, BatchError> {
        let resolved = ResolvedItem::new(item, options);
        let checked = resolved.check(item);
        let ResolvedItem {
            admin,
            reward_recipient,
            rewards,
        } = resolved;

        let mut result = BatchItemResult {
            index,
            id: item.id.clone(),
            name: item.name.clone(),
            symbol: item.symbol.clone(),
            success: false,
            receipt: None,
            error: None,
            error_kind: None,
            attempts: 0,
            timestamp: self.clock.now(),
            admin,
            reward_recipient,
        };

        if let Err(error) = checked {
            tracing::warn!(index, name = %item.name, error = %error, "Item rejected before deployment");
            result.error = Some(error.message);
            result.error_kind = Some(error.kind);
            return Ok(result);
        }

        let request = DeployRequest {
            chain: options.chain,
            name: item.name.clone(),
            symbol: item.symbol.clone(),
            image: item.image.clone(),
            metadata: item.metadata.clone(),
            admin: result.admin.clone(),
            rewards,
            fee_percentage: options.fee_percentage,
        };

        tracing::info!(index, name = %item.name, symbol = %item.symbol, "Deploying item...");

        let mut last_error = None;
        for retry in 0..=options.retries {
            if retry > 0 {
                hooks.notify_retry(RetryNotice {
                    index,
                    retry,
                    max_retries: options.retries,
                })?;
                let delay = backoff.delay(retry - 1);
                tracing::debug!(index, retry, delay_ms = delay.as_millis() as u64, "Retrying item...");
                self.clock.sleep(delay).await;
            }

            let attempt = retry.saturating_add(1);
            match self.deployer.deploy(&request).await {
                Ok(receipt) => {
                    tracing::info!(
                        index,
                        name = %item.name,
                        address = %receipt.address,
                        tx_hash = %receipt.tx_hash,
                        attempt,
                        "Item deployed"
                    );
                    result.success = true;
                    result.receipt = Some(receipt);
                    result.attempts = attempt;
                    result.timestamp = self.clock.now();
                    return Ok(result);
                }
                Err(error) => {
                    tracing::warn!(index, attempt, error = %error, "Item deployment attempt failed");
                    hooks.notify_error(&ItemFailure {
                        index,
                        attempt,
                        error: &error,
                    })?;
                    last_error = Some(error);
                }
            }
        }

        let error =
            last_error.unwrap_or_else(|| OperationError::unknown("deployment was never attempted"));
        tracing::error!(index, name = %item.name, error = %error, "Item failed after all retries");

        result.error = Some(error.message);
        result.error_kind = Some(error.kind);
        result.attempts = options.retries.saturating_add(1);
        result.timestamp = self.clock.now();
        Ok(result)
    }
}

fn check_batch_size(count: usize) -> Result<(), BatchError> {
    if count == 0 {
        return Err(BatchError::EmptyBatch);
    }
    if count > MAX_BATCH_SIZE {
        return Err(BatchError::TooManyItems {
            count,
            max: MAX_BATCH_SIZE,
        });
    }
    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// An item with its admin, reward recipient and reward split worked out.
///
/// The admin falls back from the item to `default_admin`, then to the wallet.
/// The reward recipient falls back from the item to `default_recipient`, then
/// to the admin, and receives whatever share the split leaves over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedItem {
    pub admin: String,
    pub reward_recipient: String,
    pub rewards: Vec<allocation::NormalizedRecipient>,
}

impl ResolvedItem {
    pub fn new(item: &BatchItem, options: &BatchOptions) -> Self {
        let admin = non_empty(&item.admin)
            .or_else(|| non_empty(&options.default_admin))
            .unwrap_or(options.wallet_address.as_str())
            .to_string();
        let reward_recipient = non_empty(&item.reward_recipient)
            .or_else(|| non_empty(&options.default_recipient))
            .unwrap_or(admin.as_str())
            .to_string();
        let rewards = allocation::normalize(&item.rewards, Some(&reward_recipient));

        Self {
            admin,
            reward_recipient,
            rewards,
        }
    }

    /// Checks that make a deployment of `item` pointless to attempt.
    pub fn check(&self, item: &BatchItem) -> Result<(), OperationError> {
        if item.name.trim().is_empty() {
            return Err(OperationError::validation("token name is required"));
        }
        if item.symbol.trim().is_empty() {
            return Err(OperationError::validation("token symbol is required"));
        }
        if !is_valid_address(&self.admin) {
            return Err(OperationError::validation(format!(
                "Invalid admin address: '{}'",
                self.admin
            )));
        }
        allocation::validate(&self.rewards).map_err(|e| OperationError::validation(e.to_string()))
    }
}
