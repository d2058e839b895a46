//! mintbatch-deploy - Resilient batch deployment of tokens.
//!
//! This crate provides the pieces needed to deploy many tokens in one run
//! without losing track of partial failures:
//!
//! - [`allocation`] resolves reward splits into whole percentages summing to 100.
//! - [`resilience`] wraps single remote calls with retries, backoff and a
//!   per-operation circuit breaker.
//! - [`batch`] deploys up to 100 items in order, retrying each one, and returns
//!   a summary that can be persisted and replayed.
//!
//! The deployment call itself is supplied by the caller through [`TokenDeployer`].

pub mod allocation;
pub mod batch;
pub mod clock;
mod error;
pub mod resilience;
pub mod rpc;

pub use allocation::{
    AllocationError, NormalizedRecipient, RewardRecipient, is_valid_address, normalize, validate,
};
pub use batch::{
    BatchDeployer, BatchHooks, BatchItem, BatchItemResult, BatchOptions, BatchProgress,
    BatchSummary, Chain, DeployReceipt, DeployRequest, ItemFailure, ResolvedItem, RetryNotice,
    TokenDeployer, TokenMetadata,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BatchError, ErrorKind, MAX_BATCH_SIZE, OperationError};
pub use resilience::{
    BackoffKind, BackoffPolicy, ExecutionResult, OperationAttempt, OperationClass,
    ResilientExecutor, RetryProfile, RetryStats,
};
