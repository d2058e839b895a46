//! Integration tests for mintbatch-deploy.
//!
//! These drive the public API end to end with a scripted deployer and a
//! virtual clock, so no network or real waiting is involved.
//! Run with: cargo test --test integration_test

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use mintbatch_deploy::{
    BackoffKind, BackoffPolicy, BatchDeployer, BatchItem, BatchOptions, BatchSummary, Chain,
    DeployReceipt, DeployRequest, ErrorKind, ManualClock, OperationClass, OperationError,
    ResilientExecutor, RetryProfile, RewardRecipient, TokenDeployer, normalize, validate,
};

const WALLET: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

/// Route library logs to the test output; only the first call installs it.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Deployer whose behavior per symbol is scripted up front.
#[derive(Default)]
struct ScriptedDeployer {
    /// Symbols that always fail.
    broken: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedDeployer {
    fn with_broken(symbols: &[&str]) -> Self {
        Self {
            broken: Mutex::new(symbols.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    fn repair(&self, symbol: &str) {
        self.broken.lock().unwrap().remove(symbol);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_per_symbol(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for symbol in self.calls() {
            *counts.entry(symbol).or_default() += 1;
        }
        counts
    }
}

impl TokenDeployer for ScriptedDeployer {
    fn deploy(
        &self,
        request: &DeployRequest,
    ) -> impl Future<Output = Result<DeployReceipt, OperationError>> + Send {
        self.calls.lock().unwrap().push(request.symbol.clone());
        let broken = self.broken.lock().unwrap().contains(&request.symbol);
        let symbol = request.symbol.clone();

        async move {
            if broken {
                Err(OperationError::server(format!("execution reverted for {}", symbol)))
            } else {
                Ok(DeployReceipt {
                    address: format!("0x{:0>40}", hex_of(&symbol)),
                    tx_hash: format!("0x{:0>64}", hex_of(&symbol)),
                    explorer_url: Some(format!("https://basescan.org/token/{}", symbol)),
                })
            }
        }
    }
}

fn hex_of(s: &str) -> String {
    s.bytes().map(|b| format!("{:02x}", b)).collect()
}

fn items(symbols: &[&str]) -> Vec<BatchItem> {
    symbols
        .iter()
        .map(|s| {
            let mut item = BatchItem::new(format!("Token {}", s), *s);
            item.id = Some(format!("id-{}", s));
            item
        })
        .collect()
}

fn options() -> BatchOptions {
    BatchOptions {
        chain: Chain::BaseSepolia,
        wallet_address: WALLET.to_string(),
        delay: Duration::from_millis(500),
        retries: 2,
        retry_delay: Duration::from_secs(1),
        ..Default::default()
    }
}

fn assert_counts_consistent(summary: &BatchSummary) {
    assert_eq!(summary.success + summary.failed, summary.results.len());
    assert!(summary.results.len() <= summary.total);
    let indices: Vec<usize> = summary.results.iter().map(|r| r.index).collect();
    assert!(indices.windows(2).all(|w| w[0] < w[1]), "{indices:?}");
}

#[tokio::test]
async fn test_stop_on_first_error() {
    init_tracing();
    let deployer =
        BatchDeployer::with_clock(ScriptedDeployer::with_broken(&["B"]), ManualClock::default());
    let options = BatchOptions {
        continue_on_error: false,
        ..options()
    };

    let summary = deployer.deploy(&items(&["A", "B", "C"]), &options).await.unwrap();

    assert_eq!(summary.results.len(), 2);
    assert!(summary.results[0].success);
    assert!(!summary.results[1].success);
    assert_eq!(summary.results[1].attempts, 3);
    assert_eq!(summary.results[1].error_kind, Some(ErrorKind::Server));
    assert!(summary.stopped_early());
    assert!(!deployer.deployer().calls().contains(&"C".to_string()));
    assert_counts_consistent(&summary);
}

#[tokio::test]
async fn test_continue_on_error_processes_everything() {
    init_tracing();
    let deployer =
        BatchDeployer::with_clock(ScriptedDeployer::with_broken(&["B"]), ManualClock::default());

    let summary = deployer.deploy(&items(&["A", "B", "C"]), &options()).await.unwrap();

    assert_eq!(summary.results.len(), 3);
    assert_eq!(summary.success, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failed_indices(), vec![1]);
    assert_eq!(deployer.deployer().calls_per_symbol()["B"], 3);
    assert_counts_consistent(&summary);
}

#[tokio::test]
async fn test_resume_from_start_index() {
    init_tracing();
    let deployer = BatchDeployer::with_clock(ScriptedDeployer::default(), ManualClock::default());
    let options = BatchOptions {
        start_index: 2,
        ..options()
    };

    let summary = deployer
        .deploy(&items(&["A", "B", "C", "D", "E"]), &options)
        .await
        .unwrap();

    assert_eq!(summary.results.len(), 3);
    assert_eq!(summary.results[0].index, 2);
    assert_eq!(summary.results[0].id.as_deref(), Some("id-C"));
    assert_eq!(summary.results[2].index, 4);
    assert_eq!(deployer.deployer().calls(), vec!["C", "D", "E"]);
    assert_counts_consistent(&summary);
}

#[tokio::test]
async fn test_timing_of_a_run() {
    init_tracing();
    let clock = ManualClock::default();
    let deployer =
        BatchDeployer::with_clock(ScriptedDeployer::with_broken(&["B"]), clock.clone());

    let summary = deployer.deploy(&items(&["A", "B", "C"]), &options()).await.unwrap();

    // two inter-item delays plus two retry delays for B
    assert_eq!(clock.total_slept(), Duration::from_secs(3));
    assert_eq!(summary.duration(), Duration::from_secs(3));
    assert_eq!(summary.average_time_per_item(), Duration::from_secs(1));
    assert_eq!(summary.format_duration(), "3s");
}

#[tokio::test]
async fn test_retry_failed_keeps_original_indices() {
    init_tracing();
    let deployer = BatchDeployer::with_clock(
        ScriptedDeployer::with_broken(&["B", "D"]),
        ManualClock::default(),
    );
    let items = items(&["A", "B", "C", "D"]);

    let first = deployer.deploy(&items, &options()).await.unwrap();
    assert_eq!(first.failed_indices(), vec![1, 3]);

    deployer.deployer().repair("B");
    let second = deployer.retry_failed(&first, &items, &options()).await.unwrap();

    assert_eq!(second.results.len(), 2);
    assert_eq!(second.results[0].index, 1);
    assert!(second.results[0].success);
    assert_eq!(second.results[1].index, 3);
    assert!(!second.results[1].success);
    assert_eq!(second.failed_indices(), vec![3]);
    // the first summary is left untouched
    assert_eq!(first.failed, 2);
}

#[tokio::test]
async fn test_retry_failed_with_nothing_to_retry() {
    init_tracing();
    let deployer = BatchDeployer::with_clock(ScriptedDeployer::default(), ManualClock::default());
    let items = items(&["A"]);
    let summary = deployer.deploy(&items, &options()).await.unwrap();

    let err = deployer.retry_failed(&summary, &items, &options()).await.unwrap_err();
    assert!(matches!(err, mintbatch_deploy::BatchError::EmptyBatch));
}

#[tokio::test]
async fn test_summary_survives_persistence() {
    init_tracing();
    let deployer =
        BatchDeployer::with_clock(ScriptedDeployer::with_broken(&["B"]), ManualClock::default());
    let items = items(&["A", "B"]);
    let summary = deployer.deploy(&items, &options()).await.unwrap();

    let json = serde_json::to_string_pretty(&summary).unwrap();
    let reloaded: BatchSummary = serde_json::from_str(&json).unwrap();

    assert_eq!(reloaded, summary);
    assert_eq!(reloaded.chain, Chain::BaseSepolia);
    assert_eq!(reloaded.failed_indices(), vec![1]);
}

#[tokio::test]
async fn test_executor_retries_then_opens_breaker() {
    init_tracing();
    let clock = ManualClock::default();
    let profile = RetryProfile {
        max_retries: 2,
        backoff: BackoffPolicy::new(
            BackoffKind::Linear,
            Duration::from_millis(200),
            Duration::from_secs(5),
        ),
        retryable: HashSet::from([ErrorKind::Network]),
        failure_threshold: 3,
        cool_down: Duration::from_secs(10),
    };
    let executor =
        ResilientExecutor::with_clock(clock.clone()).with_profile(OperationClass::Auto, profile);
    let calls = AtomicU32::new(0);

    let failing = || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(OperationError::network("connection reset")) }
    };

    let first = executor.execute(failing, OperationClass::Auto, Some("factory")).await;
    assert_eq!(first.attempt_count(), 3);
    assert!(!first.circuit_open);
    // linear backoff with up to 10% jitter: 200ms then 400ms
    let sleeps = clock.sleeps();
    assert_eq!(sleeps.len(), 2);
    assert!(sleeps[0] >= Duration::from_millis(200) && sleeps[0] <= Duration::from_millis(220));
    assert!(sleeps[1] >= Duration::from_millis(400) && sleeps[1] <= Duration::from_millis(440));

    let breaker = executor.breaker("factory").unwrap();
    assert!(breaker.is_open());
    assert_eq!(breaker.failures, 3);

    let blocked = executor.execute(failing, OperationClass::Auto, Some("factory")).await;
    assert!(blocked.circuit_open);
    assert_eq!(blocked.attempt_count(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    clock.advance(Duration::from_secs(10));
    let recovered = executor
        .execute(|| async { Ok::<_, OperationError>(42) }, OperationClass::Auto, Some("factory"))
        .await;
    assert_eq!(recovered.into_result().unwrap(), 42);
    assert!(!executor.breaker("factory").unwrap().is_open());
}

#[test]
fn test_normalized_allocations_always_validate() {
    let addresses = [
        "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
        "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC",
        "0x90F79bf6EB2c4f870365E785982E1f101E93b906",
        "0x15d34AAf54267DB7D7c367839AAf71A00a2C6A65",
        "0x9965507D1a55bcC2695C58ba16FB37d819B0A4dc",
        "0x976EA74026E726554dB657fA54763abd0C3a0aa9",
        "0x14dC79964da2C08b23698B3D3cc7Ca32193d9955",
    ];

    for implicit in 1..addresses.len() {
        for explicit in [0u32, 5, 13, 64, 99] {
            let mut recipients = vec![RewardRecipient::with_allocation(addresses[0], explicit)];
            recipients.extend(addresses[1..=implicit].iter().map(|a| RewardRecipient::new(*a)));

            let normalized = normalize(&recipients, Some(WALLET));
            assert!(
                validate(&normalized).is_ok(),
                "explicit={explicit} implicit={implicit}: {normalized:?}"
            );
        }
    }
}
