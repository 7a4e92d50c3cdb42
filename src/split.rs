//! Turns an expense amount into per-member splits.
//!
//! Every proportional policy goes through [`allocate`], which rounds each share
//! toward zero and hands the leftover minor units to the first members in input
//! order, so the splits always add up to the expense amount.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    money::Money,
    schemas::{MemberId, Split},
};

/// Fixed-point scale applied to percentages.
const WEIGHT_SCALE: f64 = 1_000_000.0;

/// Weight given to the largest share.
const SHARE_SCALE: f64 = 1_000_000_000_000.0;

/// Allowed distance of a percentage sum from 100.
const PERCENTAGE_TOLERANCE: f64 = 0.01;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SplitError {
    #[error("expense amount must be positive, got {0}")]
    NonPositiveAmount(Money),
    #[error("an expense needs at least one participant")]
    NoParticipants,
    #[error("expected {expected} split values, got {actual}")]
    ParameterCountMismatch { expected: usize, actual: usize },
    #[error("split amounts add up to {actual}, expected {expected}")]
    SplitSumMismatch { expected: Money, actual: Money },
    #[error("percentages add up to {0}, expected 100")]
    PercentageSumInvalid(f64),
    #[error("`{0}` is not a valid percentage")]
    InvalidPercentage(f64),
    #[error("`{0}` is not a valid share, shares must be positive")]
    InvalidShareValue(f64),
    #[error("`{0}` is not a valid split amount")]
    InvalidSplitAmount(f64),
    #[error("unknown split policy `{0}`")]
    UnknownPolicy(String),
}

/// A member taking part in an expense.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Participant {
    pub user_id: MemberId,
    pub display_name: String,
}

impl Participant {
    pub fn new(user_id: impl Into<MemberId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SplitPolicy {
    Equal,
    /// Explicit amount per member, in input order.
    Unequal(Vec<f64>),
    Percentage(Vec<f64>),
    Shares(Vec<f64>),
}

/// Split policy as it arrives on the wire, before the tag is checked.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PolicyRequest {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f64>>,
}

impl TryFrom<PolicyRequest> for SplitPolicy {
    type Error = SplitError;

    fn try_from(request: PolicyRequest) -> Result<Self, Self::Error> {
        let values = request.values.unwrap_or_default();
        match request.kind.to_ascii_lowercase().as_str() {
            "equal" => Ok(SplitPolicy::Equal),
            "unequal" => Ok(SplitPolicy::Unequal(values)),
            "percentage" => Ok(SplitPolicy::Percentage(values)),
            "shares" => Ok(SplitPolicy::Shares(values)),
            _ => Err(SplitError::UnknownPolicy(request.kind)),
        }
    }
}

pub fn compute_splits(
    amount: Money,
    members: &[Participant],
    payer: &str,
    policy: &SplitPolicy,
) -> Result<Vec<Split>, SplitError> {
    if !amount.is_positive() {
        return Err(SplitError::NonPositiveAmount(amount));
    }
    if members.is_empty() {
        return Err(SplitError::NoParticipants);
    }

    let amounts = match policy {
        SplitPolicy::Equal => allocate(amount, &vec![1; members.len()]),
        SplitPolicy::Unequal(values) => explicit_amounts(amount, members.len(), values)?,
        SplitPolicy::Percentage(values) => {
            check_count(members.len(), values)?;
            allocate(amount, &percentage_weights(values)?)
        }
        SplitPolicy::Shares(values) => {
            check_count(members.len(), values)?;
            allocate(amount, &share_weights(values)?)
        }
    };

    let splits: Vec<Split> = members
        .iter()
        .zip(amounts)
        .map(|(member, amount)| Split {
            user_id: member.user_id.clone(),
            display_name: member.display_name.clone(),
            amount,
            paid: member.user_id == payer,
        })
        .collect();

    tracing::debug!(
        total = %amount,
        members = splits.len(),
        "computed expense splits"
    );
    Ok(splits)
}

fn check_count(expected: usize, values: &[f64]) -> Result<(), SplitError> {
    if values.len() != expected {
        return Err(SplitError::ParameterCountMismatch {
            expected,
            actual: values.len(),
        });
    }
    Ok(())
}

fn explicit_amounts(total: Money, members: usize, values: &[f64]) -> Result<Vec<Money>, SplitError> {
    check_count(members, values)?;
    let amounts = values
        .iter()
        .map(|&value| match Money::from_major(value) {
            Some(amount) if !amount.is_negative() => Ok(amount),
            _ => Err(SplitError::InvalidSplitAmount(value)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut actual = Money::zero();
    for (&amount, &value) in amounts.iter().zip(values) {
        actual = actual
            .checked_add(amount)
            .ok_or(SplitError::InvalidSplitAmount(value))?;
    }
    if actual != total {
        return Err(SplitError::SplitSumMismatch {
            expected: total,
            actual,
        });
    }
    Ok(amounts)
}

fn percentage_weights(values: &[f64]) -> Result<Vec<u128>, SplitError> {
    if let Some(&bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
        return Err(SplitError::InvalidPercentage(bad));
    }
    let sum: f64 = values.iter().sum();
    if (sum - 100.0).abs() > PERCENTAGE_TOLERANCE {
        return Err(SplitError::PercentageSumInvalid(sum));
    }
    Ok(values.iter().map(|&v| to_weight(v)).collect())
}

fn share_weights(values: &[f64]) -> Result<Vec<u128>, SplitError> {
    if let Some(&bad) = values.iter().find(|v| !v.is_finite() || **v <= 0.0) {
        return Err(SplitError::InvalidShareValue(bad));
    }
    // Scaled against the largest share; tiny positive shares keep weight 1
    let largest = values.iter().copied().fold(0.0_f64, f64::max);
    Ok(values
        .iter()
        .map(|&value| ((value / largest * SHARE_SCALE).round() as u128).max(1))
        .collect())
}

fn to_weight(value: f64) -> u128 {
    (value * WEIGHT_SCALE).round() as u128
}

/// Divides `total` proportionally to `weights`.
///
/// Each share is rounded toward zero; the residue (always smaller than the
/// number of weighted members) goes one minor unit at a time to the first
/// members with a non-zero weight. `total` must be positive and at least one
/// weight non-zero.
pub fn allocate(total: Money, weights: &[u128]) -> Vec<Money> {
    // Keep every weight below 2^64 so `minor * weight` fits in a u128
    let shift = weights
        .iter()
        .max()
        .map_or(0, |max| (u128::BITS - max.leading_zeros()).saturating_sub(64));
    let weights: Vec<u128> = weights
        .iter()
        .map(|&weight| if weight == 0 { 0 } else { (weight >> shift).max(1) })
        .collect();

    let weight_sum: u128 = weights.iter().sum();
    if weight_sum == 0 {
        return vec![Money::zero(); weights.len()];
    }
    let minor = total.minor().max(0) as u128;

    let mut shares: Vec<i64> = weights
        .iter()
        .map(|&weight| (minor * weight / weight_sum) as i64)
        .collect();

    let mut residue = total.minor() - shares.iter().sum::<i64>();
    for (share, &weight) in shares.iter_mut().zip(&weights) {
        if residue == 0 {
            break;
        }
        if weight > 0 {
            *share += 1;
            residue -= 1;
        }
    }

    shares.into_iter().map(Money::from_minor).collect()
}
