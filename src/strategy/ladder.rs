//! Bid sizing: single-price capacity and multi-step ladders.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use super::pricing::{quantize, QuantizeMode};
use crate::config::LadderStepConfig;
use crate::types::LadderStep;

/// Price limits every bid price is clamped into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceBounds {
    pub min_price: Decimal,
    /// Ceiling from the bid-to-list ratio. Wins over `min_price` on conflict.
    pub max_price: Decimal,
    pub quantum: Option<Decimal>,
}

impl PriceBounds {
    /// Clamp into bounds, snap to the quantum, and never round above the ceiling.
    pub fn clamp(&self, price: Decimal) -> Decimal {
        let mut p = price.max(self.min_price).min(self.max_price);
        if let Some(q) = self.quantum {
            p = quantize(p, q, QuantizeMode::Nearest);
            if p > self.max_price {
                p = quantize(self.max_price, q, QuantizeMode::Down);
            }
        }
        p
    }
}

/// Whole units affordable at `price`.
pub fn single_quantity(budget: Decimal, price: Decimal) -> u64 {
    if budget <= Decimal::ZERO || price <= Decimal::ZERO {
        return 0;
    }
    (budget / price).floor().to_u64().unwrap_or(0)
}

/// Split `budget` across ladder steps.
///
/// Each step's target is its share of what the whole budget would buy at
/// the step's price (`floor(budget / price) * allocation / total_allocation`),
/// capped by what is still left after earlier steps. Steps are processed in
/// declared order and zero-quantity steps are dropped.
pub fn ladder_allocation(
    reference: Decimal,
    steps: &[LadderStepConfig],
    budget: Decimal,
    bounds: &PriceBounds,
) -> Vec<LadderStep> {
    let total_allocation: Decimal = steps.iter().map(|s| s.allocation).sum();
    if reference <= Decimal::ZERO || budget <= Decimal::ZERO || total_allocation <= Decimal::ZERO {
        return Vec::new();
    }

    let mut remaining = budget;
    let mut out = Vec::with_capacity(steps.len());

    for step in steps {
        let price = bounds.clamp(reference * step.price_percent);
        if price <= Decimal::ZERO {
            debug!(percent = %step.price_percent, "Ladder step priced at zero, skipping");
            continue;
        }

        let provisional = Decimal::from(single_quantity(budget, price));
        let target = (provisional * step.allocation / total_allocation)
            .floor()
            .to_u64()
            .unwrap_or(0);
        let quantity = target.min(single_quantity(remaining, price));

        if quantity == 0 {
            debug!(percent = %step.price_percent, price = %price, "Ladder step has no quantity, skipping");
            continue;
        }

        remaining -= price * Decimal::from(quantity);
        out.push(LadderStep {
            price_percent: step.price_percent,
            allocation: step.allocation,
            price,
            quantity,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn step(pct: Decimal, alloc: Decimal) -> LadderStepConfig {
        LadderStepConfig { price_percent: pct, allocation: alloc }
    }

    fn open_bounds() -> PriceBounds {
        PriceBounds { min_price: Decimal::ZERO, max_price: Decimal::MAX, quantum: None }
    }

    #[test]
    fn test_single_quantity() {
        assert_eq!(single_quantity(dec!(10000), dec!(84)), 119);
        assert_eq!(single_quantity(dec!(83), dec!(84)), 0);
        assert_eq!(single_quantity(Decimal::ZERO, dec!(84)), 0);
        assert_eq!(single_quantity(dec!(100), Decimal::ZERO), 0);
    }

    #[test]
    fn test_two_step_ladder_budget_walk() {
        let steps = vec![step(dec!(0.9), dec!(0.5)), step(dec!(0.7), dec!(0.5))];
        let ladder = ladder_allocation(dec!(100), &steps, dec!(10000), &open_bounds());

        assert_eq!(ladder.len(), 2);
        assert_eq!((ladder[0].price, ladder[0].quantity), (dec!(90), 55));
        assert_eq!((ladder[1].price, ladder[1].quantity), (dec!(70), 71));
        let spent: Decimal = ladder.iter().map(LadderStep::cost).sum();
        assert_eq!(spent, dec!(9920));
    }

    #[test]
    fn test_ladder_clamps_to_bounds() {
        let steps = vec![step(dec!(0.95), dec!(0.5)), step(dec!(0.1), dec!(0.5))];
        let bounds = PriceBounds { min_price: dec!(50), max_price: dec!(90), quantum: None };
        let ladder = ladder_allocation(dec!(100), &steps, dec!(10000), &bounds);
        assert_eq!(ladder[0].price, dec!(90));
        assert_eq!(ladder[1].price, dec!(50));
    }

    #[test]
    fn test_clamp_quantum_never_exceeds_ceiling() {
        let bounds = PriceBounds { min_price: Decimal::ZERO, max_price: dec!(89500), quantum: Some(dec!(1000)) };
        assert_eq!(bounds.clamp(dec!(89400)), dec!(89000));
        assert_eq!(bounds.clamp(dec!(84400)), dec!(84000));
    }

    #[test]
    fn test_zero_budget_or_reference_yields_empty() {
        let steps = vec![step(dec!(0.9), dec!(1.0))];
        assert!(ladder_allocation(dec!(100), &steps, Decimal::ZERO, &open_bounds()).is_empty());
        assert!(ladder_allocation(Decimal::ZERO, &steps, dec!(1000), &open_bounds()).is_empty());
        assert!(ladder_allocation(dec!(100), &[], dec!(1000), &open_bounds()).is_empty());
    }

    #[test]
    fn test_tiny_budget_drops_steps() {
        let steps = vec![step(dec!(0.9), dec!(0.5)), step(dec!(0.7), dec!(0.5))];
        let ladder = ladder_allocation(dec!(100), &steps, dec!(150), &open_bounds());
        // floor(150/90)=1 -> 0 after allocation; floor(150/70)=2 -> 1.
        assert_eq!(ladder.len(), 1);
        assert_eq!((ladder[0].price, ladder[0].quantity), (dec!(70), 1));
    }

    proptest! {
        #[test]
        fn prop_ladder_within_budget(
            reference in 1u64..1_000_000,
            budget in 0u64..100_000_000,
            raw in prop::collection::vec((1u32..99, 1u32..100), 1..6),
        ) {
            let steps: Vec<LadderStepConfig> = raw
                .into_iter()
                .map(|(p, a)| step(Decimal::new(p as i64, 2), Decimal::new(a as i64, 2)))
                .collect();
            let ladder = ladder_allocation(
                Decimal::from(reference),
                &steps,
                Decimal::from(budget),
                &open_bounds(),
            );
            let spent: Decimal = ladder.iter().map(LadderStep::cost).sum();
            prop_assert!(spent <= Decimal::from(budget));
            prop_assert!(ladder.iter().all(|s| s.quantity > 0));
        }
    }
}
