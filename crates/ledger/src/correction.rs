use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use fiscalchain_core::{DomainError, DomainResult};

/// Monetary amounts of a compensating ledger entry, tax-split and rounded
/// to cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionAmounts {
    pub taxable_base: Decimal,
    pub tax_amount: Decimal,
    pub final_total: Decimal,
}

impl CorrectionAmounts {
    /// Amounts of a cancellation entry.
    ///
    /// All zero: the reversal is carried by the original row flipping to
    /// cancelled, not by compensating amounts. A negated-amount variant
    /// would slot in here if that reading ever changes.
    pub fn zero() -> Self {
        Self {
            taxable_base: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            final_total: Decimal::ZERO,
        }
    }

    /// Full reversal: the rectifying total is the negated original total.
    pub fn full(original_total: Decimal, vat_rate: Decimal) -> DomainResult<Self> {
        Self::split(-original_total, vat_rate)
    }

    /// Delta correction: the rectifying total is the replacement total minus
    /// the original total. The replacement total must not be negative.
    pub fn delta(
        original_total: Decimal,
        new_total: Decimal,
        vat_rate: Decimal,
    ) -> DomainResult<Self> {
        if new_total < Decimal::ZERO {
            return Err(DomainError::validation(
                "replacement total must not be negative",
            ));
        }
        Self::split(new_total - original_total, vat_rate)
    }

    /// Split a signed total into base + VAT at `vat_rate` percent.
    ///
    /// The base is rounded to cents half away from zero and the tax takes
    /// the remainder, so `taxable_base + tax_amount == final_total` holds
    /// exactly.
    fn split(final_total: Decimal, vat_rate: Decimal) -> DomainResult<Self> {
        if vat_rate < Decimal::ZERO {
            return Err(DomainError::validation("vat rate must not be negative"));
        }
        let final_total =
            final_total.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let divisor = Decimal::ONE + vat_rate / Decimal::ONE_HUNDRED;
        let taxable_base = (final_total / divisor)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let tax_amount = final_total - taxable_base;
        Ok(Self {
            taxable_base,
            tax_amount,
            final_total,
        })
    }
}
