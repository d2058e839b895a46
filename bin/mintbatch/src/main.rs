//! mintbatch is a CLI tool to deploy batches of tokens and keep track of what failed.

mod cli;
mod config;
mod dry_run;
mod report;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{BatchArgs, Cli, Command};
use config::Config;
use dry_run::DryRunDeployer;
use mintbatch_deploy::{BatchDeployer, BatchHooks, BatchItem, BatchOptions, BatchSummary, rpc};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Check { rpc_url } => check(&config, rpc_url).await,
        Command::Plan { items, batch } => {
            let items: Vec<BatchItem> = report::read_json(&items)?;
            let options = batch.apply(config.batch.clone());
            println!("{}", report::plan_table(&items, &options));
            Ok(())
        }
        Command::DryRun {
            items,
            output,
            batch,
        } => {
            let items: Vec<BatchItem> = report::read_json(&items)?;
            let options = batch.apply(config.batch.clone());
            let summary = dry_run(&items, &options, &batch, None).await?;
            report::write_json(&output, &summary)?;
            print_summary(&summary);
            Ok(())
        }
        Command::Retry {
            items,
            summary,
            output,
            batch,
        } => {
            let items: Vec<BatchItem> = report::read_json(&items)?;
            let previous: BatchSummary = report::read_json(&summary)?;
            let options = batch.apply(config.batch.clone());
            let summary = dry_run(&items, &options, &batch, Some(&previous)).await?;
            report::write_json(&output, &summary)?;
            print_summary(&summary);
            Ok(())
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Report { summary } => {
            let summary: BatchSummary = report::read_json(&summary)?;
            print_summary(&summary);
            Ok(())
        }
    }
}

async fn check(config: &Config, rpc_url: Option<url::Url>) -> Result<()> {
    let url = match rpc_url {
        Some(url) => url,
        None => config
            .rpc_url
            .as_deref()
            .context("No RPC URL given on the command line or in the configuration")?
            .parse::<url::Url>()
            .context("Invalid rpc_url in the configuration")?,
    };

    let executor = config.executor();
    let client = rpc::create_client()?;

    tracing::info!(url = %url, "Checking RPC connectivity...");
    let outcome = rpc::check_connectivity(&executor, &client, url.as_str()).await;
    let attempts = outcome.attempt_count();
    let elapsed = outcome.elapsed;

    let chain_id = outcome
        .into_result()
        .context(format!("RPC endpoint {} is not reachable", url))?;

    tracing::info!(
        url = %url,
        chain_id,
        attempts,
        elapsed_ms = elapsed.as_millis() as u64,
        "RPC endpoint reachable"
    );
    println!("{} (chain id {})", url, chain_id);
    Ok(())
}

/// Run `items` through the offline deployer, or only the failed items of
/// `previous` when given.
async fn dry_run(
    items: &[BatchItem],
    options: &BatchOptions,
    args: &BatchArgs,
    previous: Option<&BatchSummary>,
) -> Result<BatchSummary> {
    let deployer = BatchDeployer::new(DryRunDeployer::failing(&args.fail_symbols));
    let mut hooks = BatchHooks::new().on_progress(|progress| {
        tracing::info!(
            completed = progress.completed,
            total = progress.total,
            index = progress.result.index,
            success = progress.result.success,
            "Progress"
        );
        Ok(())
    });

    let summary = match previous {
        Some(previous) => {
            deployer
                .retry_failed_with_hooks(previous, items, options, &mut hooks)
                .await?
        }
        None => deployer.deploy_with_hooks(items, options, &mut hooks).await?,
    };

    tracing::debug!(calls = deployer.deployer().calls(), "Offline deployer done");
    Ok(summary)
}

fn print_summary(summary: &BatchSummary) {
    println!("{}", report::results_table(summary));
    println!("{}", report::stats_table(summary));
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::Duration};

    use tempdir::TempDir;

    use super::*;

    const WALLET: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn options() -> BatchOptions {
        BatchOptions {
            wallet_address: WALLET.to_string(),
            delay: Duration::ZERO,
            retries: 1,
            retry_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn write_items(dir: &Path, symbols: &[&str]) -> Vec<BatchItem> {
        let items: Vec<BatchItem> = symbols
            .iter()
            .map(|s| BatchItem::new(format!("{} Token", s), *s))
            .collect();
        report::write_json(&dir.join("items.json"), &items).unwrap();
        items
    }

    #[tokio::test]
    async fn test_dry_run_then_retry() {
        let dir = TempDir::new("mintbatch-dry-run").unwrap();
        let items = write_items(dir.path(), &["AAA", "BBB", "CCC"]);
        let failing = BatchArgs {
            fail_symbols: vec!["BBB".to_string()],
            ..Default::default()
        };

        let summary = dry_run(&items, &options(), &failing, None).await.unwrap();
        assert_eq!(summary.success, 2);
        assert_eq!(summary.failed_indices(), vec![1]);
        assert_eq!(summary.results[1].attempts, 2);

        let path = dir.path().join("summary.json");
        report::write_json(&path, &summary).unwrap();
        let reloaded: BatchSummary = report::read_json(&path).unwrap();

        let retried = dry_run(&items, &options(), &BatchArgs::default(), Some(&reloaded))
            .await
            .unwrap();
        assert_eq!(retried.results.len(), 1);
        assert_eq!(retried.results[0].index, 1);
        assert!(retried.results[0].success);
    }

    #[tokio::test]
    async fn test_dry_run_addresses_are_stable() {
        let dir = TempDir::new("mintbatch-stable").unwrap();
        let items = write_items(dir.path(), &["AAA"]);

        let first = dry_run(&items, &options(), &BatchArgs::default(), None).await.unwrap();
        let second = dry_run(&items, &options(), &BatchArgs::default(), None).await.unwrap();

        let address = |s: &BatchSummary| s.results[0].receipt.as_ref().map(|r| r.address.clone());
        assert!(address(&first).is_some());
        assert_eq!(address(&first), address(&second));
    }

    #[tokio::test]
    async fn test_retry_without_failures_is_an_error() {
        let dir = TempDir::new("mintbatch-no-failures").unwrap();
        let items = write_items(dir.path(), &["AAA"]);

        let summary = dry_run(&items, &options(), &BatchArgs::default(), None).await.unwrap();
        let err = dry_run(&items, &options(), &BatchArgs::default(), Some(&summary))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("at least one item"), "{err}");
    }
}
