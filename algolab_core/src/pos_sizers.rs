// algolab_core/src/pos_sizers.rs

//! Position sizing: turns a requested `OrderSize` into a quantity the account can pay for.

use crate::strategy::OrderSize;

/// Largest quantity `cash` buys at `price` once commission is added.
pub fn affordable_quantity(cash: f64, price: f64, commission_rate: f64) -> f64 {
    let unit_cost = price * (1.0 + commission_rate);
    if !(unit_cost > 0.0) || !(cash > 0.0) {
        return 0.0;
    }
    cash / unit_cost
}

/// Resolves a requested size, capping it at the affordable quantity.
///
/// # Arguments
/// * `size` - Requested size; fractions are taken of `cash`.
/// * `cash` - Cash available when flat.
/// * `price` - Market price of the fill.
/// * `commission_rate` - Flat commission rate.
///
/// # Returns
/// * Quantity to trade, `0.0` when nothing is affordable.
pub fn resolve_quantity(size: OrderSize, cash: f64, price: f64, commission_rate: f64) -> f64 {
    let affordable = affordable_quantity(cash, price, commission_rate);
    let requested = match size {
        OrderSize::Fraction(fraction) => affordable * fraction,
        OrderSize::Units(units) => units,
    };

    if requested > affordable {
        tracing::debug!(requested, affordable, "order size capped at affordable quantity");
        affordable
    } else {
        requested.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_uses_share_of_cash() {
        let qty = resolve_quantity(OrderSize::Fraction(0.5), 1_000.0, 10.0, 0.0);
        assert!((qty - 50.0).abs() < 1e-12);
    }

    #[test]
    fn fraction_is_taken_after_commission() {
        let qty = resolve_quantity(OrderSize::Fraction(0.5), 1_010.0, 10.0, 0.01);
        assert!((qty - 50.0).abs() < 1e-9);
    }

    #[test]
    fn units_are_capped_by_cash() {
        let qty = resolve_quantity(OrderSize::Units(500.0), 1_000.0, 10.0, 0.0);
        assert!((qty - 100.0).abs() < 1e-12);

        let qty = resolve_quantity(OrderSize::Units(5.0), 1_000.0, 10.0, 0.0);
        assert!((qty - 5.0).abs() < 1e-12);
    }

    #[test]
    fn commission_reduces_affordable_quantity() {
        let qty = affordable_quantity(1_010.0, 10.0, 0.01);
        assert!((qty - 100.0).abs() < 1e-9);
    }

    #[test]
    fn nothing_is_affordable_without_cash() {
        assert_eq!(affordable_quantity(0.0, 10.0, 0.0), 0.0);
        assert_eq!(affordable_quantity(-5.0, 10.0, 0.0), 0.0);
    }
}
