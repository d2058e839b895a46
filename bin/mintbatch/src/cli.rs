use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use mintbatch_deploy::{BackoffKind, BatchOptions, Chain};
use tracing::level_filters::LevelFilter;

use crate::config::CONFIG_FILENAME;

#[derive(Parser)]
#[command(name = "mintbatch")]
#[command(
    author,
    version,
    about = "Deploy batches of tokens without losing track of partial failures"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "MINTBATCH_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file.
    ///
    /// Missing files are ignored and built-in defaults are used instead.
    #[arg(long, alias = "conf", global = true, env = "MINTBATCH_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Query the chain id of an RPC endpoint, with retries and circuit breaking.
    Check {
        /// The JSON-RPC endpoint to probe. Falls back to `rpc_url` from the configuration.
        #[arg(long, alias = "rpc", env = "MINTBATCH_RPC_URL")]
        rpc_url: Option<url::Url>,
    },

    /// Resolve admins and reward splits of an items file without deploying.
    Plan {
        /// JSON file holding the list of items.
        #[arg(long)]
        items: PathBuf,

        #[clap(flatten)]
        batch: BatchArgs,
    },

    /// Run a batch against the offline deployer and write its summary.
    DryRun {
        /// JSON file holding the list of items.
        #[arg(long)]
        items: PathBuf,

        /// Where to write the summary JSON.
        #[arg(long, short, default_value = "summary.json")]
        output: PathBuf,

        #[clap(flatten)]
        batch: BatchArgs,
    },

    /// Replay the failed items of a saved summary.
    Retry {
        /// JSON file holding the list of items the summary was produced from.
        #[arg(long)]
        items: PathBuf,

        /// Summary JSON of the previous run.
        #[arg(long)]
        summary: PathBuf,

        /// Where to write the new summary JSON.
        #[arg(long, short, default_value = "summary.retry.json")]
        output: PathBuf,

        #[clap(flatten)]
        batch: BatchArgs,
    },

    /// Print the effective configuration as TOML.
    Config,

    /// Print statistics of a saved summary.
    Report {
        /// Summary JSON to read.
        #[arg(long)]
        summary: PathBuf,
    },
}

/// Batch settings that override the configuration file.
#[derive(Debug, Clone, Default, Args)]
pub struct BatchArgs {
    /// Target chain (name or chain id).
    #[arg(long)]
    pub chain: Option<Chain>,

    /// Address of the deploying wallet.
    #[arg(long, alias = "wallet")]
    pub wallet_address: Option<String>,

    /// Admin used by items that do not set one.
    #[arg(long)]
    pub default_admin: Option<String>,

    /// Reward recipient used by items that do not set one.
    #[arg(long)]
    pub default_recipient: Option<String>,

    /// Pause between two items, in milliseconds.
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Retries per item after the first attempt.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Base delay between attempts of one item, in milliseconds.
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// Growth of the delay between attempts (fixed, linear or exponential).
    #[arg(long)]
    pub retry_backoff: Option<BackoffKind>,

    /// First item to process, for resuming an interrupted run.
    #[arg(long)]
    pub start_index: Option<usize>,

    /// Stop at the first item that exhausts its retries.
    #[arg(long)]
    pub stop_on_error: bool,

    /// Symbols the offline deployer should always fail.
    #[arg(long = "fail", value_delimiter = ',')]
    pub fail_symbols: Vec<String>,
}

impl BatchArgs {
    /// Apply the flags that were given on top of `options`.
    pub fn apply(&self, mut options: BatchOptions) -> BatchOptions {
        if let Some(chain) = self.chain {
            options.chain = chain;
        }
        if let Some(wallet) = &self.wallet_address {
            options.wallet_address = wallet.clone();
        }
        if let Some(admin) = &self.default_admin {
            options.default_admin = Some(admin.clone());
        }
        if let Some(recipient) = &self.default_recipient {
            options.default_recipient = Some(recipient.clone());
        }
        if let Some(delay) = self.delay_ms {
            options.delay = Duration::from_millis(delay);
        }
        if let Some(retries) = self.retries {
            options.retries = retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            options.retry_delay = Duration::from_millis(delay);
        }
        if let Some(kind) = self.retry_backoff {
            options.retry_backoff = kind;
        }
        if let Some(index) = self.start_index {
            options.start_index = index;
        }
        if self.stop_on_error {
            options.continue_on_error = false;
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dry_run() {
        let cli = Cli::try_parse_from([
            "mintbatch",
            "-v",
            "debug",
            "dry-run",
            "--items",
            "items.json",
            "--chain",
            "base-sepolia",
            "--retries",
            "4",
            "--retry-backoff",
            "exponential",
            "--fail",
            "AAA,BBB",
            "--stop-on-error",
        ])
        .unwrap();

        assert_eq!(cli.verbosity, LevelFilter::DEBUG);
        let Command::DryRun { items, output, batch } = cli.command else {
            panic!("expected dry-run");
        };
        assert_eq!(items, PathBuf::from("items.json"));
        assert_eq!(output, PathBuf::from("summary.json"));
        assert_eq!(batch.chain, Some(Chain::BaseSepolia));
        assert_eq!(batch.fail_symbols, vec!["AAA", "BBB"]);

        let options = batch.apply(BatchOptions::default());
        assert_eq!(options.retries, 4);
        assert_eq!(options.retry_backoff, BackoffKind::Exponential);
        assert!(!options.continue_on_error);
    }

    #[test]
    fn test_apply_keeps_unset_fields() {
        let base = BatchOptions {
            retries: 7,
            delay: Duration::from_millis(250),
            ..Default::default()
        };
        let args = BatchArgs {
            start_index: Some(3),
            ..Default::default()
        };

        let options = args.apply(base.clone());

        assert_eq!(options.retries, 7);
        assert_eq!(options.delay, Duration::from_millis(250));
        assert_eq!(options.start_index, 3);
        assert!(options.continue_on_error);
    }

    #[test]
    fn test_parse_check_requires_valid_url() {
        assert!(Cli::try_parse_from(["mintbatch", "check", "--rpc-url", "not a url"]).is_err());
        let cli =
            Cli::try_parse_from(["mintbatch", "check", "--rpc-url", "https://mainnet.base.org"])
                .unwrap();
        assert!(matches!(cli.command, Command::Check { rpc_url: Some(_) }));
    }
}
