//! Protocol ranking and capital split.
//!
//! Protocols are ranked by `apy * 100 / sqrt(risk)`. The top
//! [`MAX_PROTOCOLS_PER_STRATEGY`] receive weights proportional to their score;
//! the weakest are dropped until every weight clears
//! [`MIN_ALLOCATION_PERCENTAGE`]. Rounding dust always goes to the first
//! (highest scored) entry so weights sum to exactly 10000 bps.

use soroban_sdk::{Env, Vec};
use tiervault_shared::{integer_sqrt, mul_div, MAX_BASIS_POINTS};

use crate::{
    Allocation, ProtocolEntry, MAX_PROTOCOLS_PER_STRATEGY, MIN_ALLOCATION_PERCENTAGE,
};

/// Fixed-point scale applied to the square root so low risk scores keep precision.
pub const SCORE_PRECISION: i128 = 1000;

const MAX_RANKED: usize = MAX_PROTOCOLS_PER_STRATEGY as usize;

/// Risk-adjusted score, scaled by [`SCORE_PRECISION`]. Zero risk scores
/// are invalid and score 0.
pub fn risk_adjusted_score(apy_bps: u32, risk_score: u32) -> i128 {
    if risk_score == 0 {
        return 0;
    }
    let root = integer_sqrt(risk_score as i128 * SCORE_PRECISION * SCORE_PRECISION);
    (apy_bps as i128 * 100 * SCORE_PRECISION) / root
}

/// Target weights over the active protocols. Amounts are left at zero.
pub fn target_weights(env: &Env, protocols: &Vec<ProtocolEntry>) -> Vec<Allocation> {
    let mut ranked = [(0u32, 0i128); MAX_RANKED];
    let mut len = 0usize;

    for protocol in protocols.iter() {
        if !protocol.is_active {
            continue;
        }
        let score = risk_adjusted_score(protocol.apy_bps, protocol.risk_score);
        if score <= 0 {
            continue;
        }

        // Equal scores keep registration order.
        let mut pos = len;
        while pos > 0 && ranked[pos - 1].1 < score {
            pos -= 1;
        }
        if pos >= MAX_RANKED {
            continue;
        }

        let mut i = if len < MAX_RANKED { len } else { MAX_RANKED - 1 };
        while i > pos {
            ranked[i] = ranked[i - 1];
            i -= 1;
        }
        ranked[pos] = (protocol.id, score);
        if len < MAX_RANKED {
            len += 1;
        }
    }

    let mut weights = Vec::new(env);
    if len == 0 {
        return weights;
    }

    let mut total = score_sum(&ranked[..len]);
    while len > 1 && ranked[len - 1].1 * MAX_BASIS_POINTS / total < MIN_ALLOCATION_PERCENTAGE as i128 {
        len -= 1;
        total = score_sum(&ranked[..len]);
    }

    let mut assigned = 0i128;
    for (protocol_id, score) in ranked[..len].iter() {
        let weight = score * MAX_BASIS_POINTS / total;
        assigned += weight;
        weights.push_back(Allocation {
            protocol_id: *protocol_id,
            weight_bps: weight as u32,
            amount: 0,
        });
    }

    let dust = (MAX_BASIS_POINTS - assigned) as u32;
    if dust > 0 {
        if let Some(mut top) = weights.get(0) {
            top.weight_bps += dust;
            weights.set(0, top);
        }
    }

    weights
}

/// Spread `total` over `weights`. `None` on overflow.
pub fn split_amount(env: &Env, weights: &Vec<Allocation>, total: i128) -> Option<Vec<Allocation>> {
    let mut allocations = Vec::new(env);
    let mut assigned = 0i128;

    for weight in weights.iter() {
        let amount = mul_div(total, weight.weight_bps as i128, MAX_BASIS_POINTS)?;
        assigned = assigned.checked_add(amount)?;
        allocations.push_back(Allocation {
            protocol_id: weight.protocol_id,
            weight_bps: weight.weight_bps,
            amount,
        });
    }

    if let Some(mut top) = allocations.get(0) {
        top.amount = top.amount.checked_add(total.checked_sub(assigned)?)?;
        allocations.set(0, top);
    }

    Some(allocations)
}

/// Largest per-protocol weight change, in basis points, between two books.
pub fn max_weight_drift(current: &Vec<Allocation>, target: &Vec<Allocation>) -> u32 {
    let mut drift = 0u32;

    for wanted in target.iter() {
        let held = weight_of(current, wanted.protocol_id);
        drift = drift.max(held.abs_diff(wanted.weight_bps));
    }
    for held in current.iter() {
        if weight_of(target, held.protocol_id) == 0 {
            drift = drift.max(held.weight_bps);
        }
    }

    drift
}

fn weight_of(allocations: &Vec<Allocation>, protocol_id: u32) -> u32 {
    allocations
        .iter()
        .find(|allocation| allocation.protocol_id == protocol_id)
        .map(|allocation| allocation.weight_bps)
        .unwrap_or(0)
}

fn score_sum(ranked: &[(u32, i128)]) -> i128 {
    ranked.iter().map(|(_, score)| *score).sum()
}
