//! Terminal tables and JSON files for items and summaries.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, Table, presets::UTF8_FULL};
use mintbatch_deploy::{BatchItem, BatchOptions, BatchSummary, ResolvedItem};
use serde::{Serialize, de::DeserializeOwned};

/// Read a JSON file into `T`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .context(format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).context(format!("Failed to parse {} as JSON", path.display()))
}

/// Write `value` as pretty JSON, creating parent directories as needed.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create directory {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
    std::fs::write(path, content).context(format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "File written");
    Ok(())
}

/// One row per item, showing what would be sent to the factory.
pub fn plan_table(items: &[BatchItem], options: &BatchOptions) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "#", "Name", "Symbol", "Admin", "Rewards", "Status",
    ]);

    for (index, item) in items.iter().enumerate().skip(options.start_index) {
        let resolved = ResolvedItem::new(item, options);
        let rewards = resolved
            .rewards
            .iter()
            .map(|r| format!("{} {}%", short_address(&r.address), r.allocation))
            .collect::<Vec<_>>()
            .join("\n");
        let status = match resolved.check(item) {
            Ok(()) => Cell::new("ready").fg(Color::Green),
            Err(e) => Cell::new(e.message).fg(Color::Red),
        };

        table.add_row(vec![
            Cell::new(index),
            Cell::new(&item.name),
            Cell::new(&item.symbol),
            Cell::new(short_address(&resolved.admin)),
            Cell::new(rewards),
            status,
        ]);
    }

    table
}

/// One row per processed item of `summary`.
pub fn results_table(summary: &BatchSummary) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "#", "Symbol", "Result", "Attempts", "Address / Error",
    ]);

    for result in &summary.results {
        let (outcome, detail) = match (&result.receipt, &result.error) {
            (Some(receipt), _) if result.success => {
                (Cell::new("ok").fg(Color::Green), receipt.address.clone())
            }
            (_, error) => (
                Cell::new("failed").fg(Color::Red),
                error.clone().unwrap_or_default(),
            ),
        };
        table.add_row(vec![
            Cell::new(result.index),
            Cell::new(&result.symbol),
            outcome,
            Cell::new(result.attempts),
            Cell::new(detail),
        ]);
    }

    table
}

/// Aggregate statistics of `summary`.
pub fn stats_table(summary: &BatchSummary) -> Table {
    let failed = summary
        .failed_indices()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.add_row(vec!["Chain".to_string(), summary.chain.to_string()]);
    table.add_row(vec!["Scheduled".to_string(), summary.total.to_string()]);
    table.add_row(vec!["Processed".to_string(), summary.results.len().to_string()]);
    table.add_row(vec!["Succeeded".to_string(), summary.success.to_string()]);
    table.add_row(vec!["Failed".to_string(), summary.failed.to_string()]);
    table.add_row(vec![
        "Success rate".to_string(),
        format!("{:.1}%", summary.success_rate()),
    ]);
    table.add_row(vec!["Duration".to_string(), summary.format_duration()]);
    table.add_row(vec![
        "Average per item".to_string(),
        format!("{:.1}s", summary.average_time_per_item().as_secs_f64()),
    ]);
    if !failed.is_empty() {
        table.add_row(vec!["Failed indices".to_string(), failed]);
    }
    if summary.stopped_early() {
        table.add_row(vec![
            "Stopped early".to_string(),
            format!("{} items never attempted", summary.total - summary.results.len()),
        ]);
    }
    table
}

fn short_address(address: &str) -> String {
    match (address.get(..6), address.get(address.len().saturating_sub(4)..)) {
        (Some(head), Some(tail)) if address.len() > 10 => format!("{}…{}", head, tail),
        _ => address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use mintbatch_deploy::RewardRecipient;
    use tempdir::TempDir;

    use super::*;

    const WALLET: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn test_json_files() {
        let dir = TempDir::new("mintbatch-report").unwrap();
        let path = dir.path().join("nested").join("items.json");
        let items = vec![BatchItem::new("One", "ONE"), BatchItem::new("Two", "TWO")];

        write_json(&path, &items).unwrap();
        let back: Vec<BatchItem> = read_json(&path).unwrap();
        assert_eq!(back, items);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(read_json::<Vec<BatchItem>>(&path).is_err());
        assert!(read_json::<Vec<BatchItem>>(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_plan_table_flags_invalid_items() {
        let mut split = BatchItem::new("Split", "SPLIT");
        split.rewards = vec![
            RewardRecipient::with_allocation("0x70997970C51812dc3A010C7d01b50e0d17dc79C8", 80),
            RewardRecipient::with_allocation("0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC", 30),
        ];
        let items = vec![BatchItem::new("One", "ONE"), split];
        let options = BatchOptions {
            wallet_address: WALLET.to_string(),
            ..Default::default()
        };

        let rendered = plan_table(&items, &options).to_string();

        assert!(rendered.contains("ready"));
        assert!(rendered.contains("sum to 100"));
        assert!(rendered.contains("0xf39F…2266 100%"));
    }

    #[test]
    fn test_short_address() {
        assert_eq!(short_address(WALLET), "0xf39F…2266");
        assert_eq!(short_address("0x1234"), "0x1234");
    }
}
