use soroban_sdk::contracttype;
use tiervault_shared::{apply_basis_points, mul_div};

/// How a withdrawal breaks down between returned principal and taxed profit.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WithdrawalSplit {
    pub amount: i128,
    pub principal_part: i128,
    pub profit_part: i128,
    pub fee: i128,
    pub net_amount: i128,
}

/// Split `amount` (0 < amount <= current_value, or 0 when the position is
/// worth nothing) into principal and profit. The performance fee is charged
/// on the profit part only. `None` on arithmetic overflow.
pub fn split_withdrawal(
    principal: i128,
    current_value: i128,
    amount: i128,
    fee_bps: i128,
) -> Option<WithdrawalSplit> {
    let principal_part = if amount >= current_value {
        principal
    } else {
        mul_div(principal, amount, current_value)?.min(principal)
    };

    let profit_part = amount.checked_sub(principal_part)?.max(0);
    let fee = apply_basis_points(profit_part, fee_bps)?;

    Some(WithdrawalSplit {
        amount,
        principal_part,
        profit_part,
        fee,
        net_amount: amount.checked_sub(fee)?,
    })
}
