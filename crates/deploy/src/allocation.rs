//! Reward allocation normalization.
//!
//! Turns a list of reward recipients, some with an explicit share and some
//! without, into whole-number percentages that sum to exactly 100.

use serde::{Deserialize, Serialize};

/// Total every normalized allocation list must add up to.
pub const TOTAL_ALLOCATION: u32 = 100;

/// Slack accepted by [`validate`] when comparing the sum against the total.
pub const ALLOCATION_TOLERANCE: f64 = 0.01;

/// A reward recipient as supplied by the caller.
///
/// `allocation` and `percentage` are two spellings of the same thing; when
/// both are present `allocation` wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRecipient {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u32>,
}

impl RewardRecipient {
    /// A recipient that takes an even share of whatever is left.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// A recipient with an explicit share.
    pub fn with_allocation(address: impl Into<String>, allocation: u32) -> Self {
        Self {
            address: address.into(),
            allocation: Some(allocation),
            percentage: None,
        }
    }

    fn explicit_share(&self) -> Option<u32> {
        self.allocation.or(self.percentage)
    }
}

/// A recipient with its resolved share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecipient {
    pub address: String,
    pub allocation: u32,
}

/// Validation failures found by [`validate`], in the order they were found.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid reward allocation: {}", .errors.join("; "))]
pub struct AllocationError {
    pub errors: Vec<String>,
}

/// Resolve every recipient's share so the list sums to 100.
///
/// Explicit shares are kept as given. The remainder (never negative) is split
/// evenly across recipients without an explicit share, with leftover units
/// handed out one at a time starting from the first of them. If the list still
/// falls short of 100, the shortfall goes to `default_recipient`, appended if
/// it is not already listed.
pub fn normalize(
    recipients: &[RewardRecipient],
    default_recipient: Option<&str>,
) -> Vec<NormalizedRecipient> {
    let default_recipient = default_recipient.filter(|address| !address.is_empty());

    if recipients.is_empty() {
        return default_recipient
            .map(|address| {
                vec![NormalizedRecipient {
                    address: address.to_string(),
                    allocation: TOTAL_ALLOCATION,
                }]
            })
            .unwrap_or_default();
    }

    let explicit_sum: u64 = recipients
        .iter()
        .filter_map(RewardRecipient::explicit_share)
        .map(u64::from)
        .sum();
    let implicit_count = recipients
        .iter()
        .filter(|r| r.explicit_share().is_none())
        .count() as u32;

    let remainder = u32::try_from(u64::from(TOTAL_ALLOCATION).saturating_sub(explicit_sum))
        .unwrap_or_default();
    let (share, mut leftover) = if implicit_count > 0 {
        (remainder / implicit_count, remainder % implicit_count)
    } else {
        (0, 0)
    };

    let mut normalized: Vec<NormalizedRecipient> = recipients
        .iter()
        .map(|recipient| {
            let allocation = match recipient.explicit_share() {
                Some(explicit) => explicit,
                None if leftover > 0 => {
                    leftover -= 1;
                    share + 1
                }
                None => share,
            };
            NormalizedRecipient {
                address: recipient.address.clone(),
                allocation,
            }
        })
        .collect();

    let total = allocation_sum(&normalized);
    if total < u64::from(TOTAL_ALLOCATION) {
        if let Some(address) = default_recipient {
            // below the total, so every share and the shortfall fit in a u32
            let shortfall = TOTAL_ALLOCATION - total as u32;
            match normalized
                .iter_mut()
                .find(|r| r.address.eq_ignore_ascii_case(address))
            {
                Some(existing) => existing.allocation += shortfall,
                None => normalized.push(NormalizedRecipient {
                    address: address.to_string(),
                    allocation: shortfall,
                }),
            }
        }
    }

    normalized
}

/// Check a normalized list before it is sent anywhere.
///
/// Every problem is reported, not just the first one.
pub fn validate(recipients: &[NormalizedRecipient]) -> Result<(), AllocationError> {
    let mut errors = Vec::new();

    for recipient in recipients {
        if !is_valid_address(&recipient.address) {
            errors.push(format!("Invalid address: '{}'", recipient.address));
        }
        if recipient.allocation > TOTAL_ALLOCATION {
            errors.push(format!(
                "Allocation for {} must be between 0 and {}, got {}",
                recipient.address, TOTAL_ALLOCATION, recipient.allocation
            ));
        }
    }

    let sum = allocation_sum(recipients);
    if (sum as f64 - f64::from(TOTAL_ALLOCATION)).abs() > ALLOCATION_TOLERANCE {
        errors.push(format!(
            "Allocations must sum to {}, got {}",
            TOTAL_ALLOCATION, sum
        ));
    }

    for (i, recipient) in recipients.iter().enumerate() {
        let seen_before = recipients[..i]
            .iter()
            .any(|other| other.address.eq_ignore_ascii_case(&recipient.address));
        if seen_before {
            errors.push(format!("Duplicate recipient: {}", recipient.address));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(AllocationError { errors })
    }
}

fn allocation_sum(recipients: &[NormalizedRecipient]) -> u64 {
    recipients.iter().map(|r| u64::from(r.allocation)).sum()
}

/// Whether `address` is a 0x-prefixed, 20-byte hex address.
pub fn is_valid_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}
