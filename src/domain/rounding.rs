// =============================================================================
// 8-decimal-place half-even rounding
// =============================================================================
//
// Every volume/quote accumulation is re-rounded to 8dp after each addition
// using banker's rounding, so the running sum is stable independent of
// trade order (spec contract; see §4.3 step 3 and §9 "toFixed(8)" note).
// =============================================================================

use rust_decimal::{Decimal, RoundingStrategy};

pub fn round8(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(8, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_to_eight_places() {
        assert_eq!(round8(dec!(1.123456785)), dec!(1.12345678));
        assert_eq!(round8(dec!(1.123456775)), dec!(1.12345678));
    }

    #[test]
    fn order_independent_sum() {
        let a = round8(round8(dec!(0.1) + dec!(0.2)) + dec!(0.000000005));
        let b = round8(dec!(0.1) + round8(dec!(0.2) + dec!(0.000000005)));
        assert_eq!(a, b);
    }
}
