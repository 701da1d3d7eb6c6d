//! Dynamic price scale derivation.
//!
//! The charting widget renders prices with `1 / pricescale` precision, so very
//! small-priced assets need a much finer scale than majors to show any
//! significant digits at all. The scale is derived from a reference price
//! (typically the instrument's last trade).

/// Maximal-precision fallback used when no usable reference price exists.
const MAX_PRICE_SCALE: u64 = 100_000_000;

/// Derive the display pricescale (a power of ten) for a reference price.
///
/// - non-finite or non-positive price: `1e8` fallback;
/// - price < 1: enough decimals to reach the first two significant digits past
///   the leading zeros, floored at 8;
/// - price >= 1: the decimals actually present after the point, floored at 2
///   (so an integer price yields `100`).
pub fn price_scale(price: f64) -> u64 {
    if !price.is_finite() || price <= 0.0 {
        return MAX_PRICE_SCALE;
    }

    // 12 fixed decimals is enough to locate significant digits for any price
    // the upstream ticker realistically serves.
    let rendered = format!("{:.12}", price);
    let fraction = rendered
        .split_once('.')
        .map(|(_, fraction)| fraction.trim_end_matches('0'))
        .unwrap_or("");

    let decimals = if price < 1.0 {
        let leading_zeros = fraction.chars().take_while(|c| *c == '0').count();
        (leading_zeros + 2).max(8)
    } else {
        fraction.len().max(2)
    };

    10u64.pow(decimals.min(12) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_prices_fall_back_to_max_precision() {
        struct TestCase {
            input: f64,
            expected: u64,
        }

        let tests = vec![
            TestCase {
                // TC0: NaN
                input: f64::NAN,
                expected: 100_000_000,
            },
            TestCase {
                // TC1: negative price
                input: -5.0,
                expected: 100_000_000,
            },
            TestCase {
                // TC2: zero
                input: 0.0,
                expected: 100_000_000,
            },
            TestCase {
                // TC3: infinite
                input: f64::INFINITY,
                expected: 100_000_000,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(price_scale(test.input), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_integer_price_yields_two_decimals() {
        assert_eq!(price_scale(1234.0), 100);
        assert_eq!(price_scale(1.0), 100);
    }

    #[test]
    fn test_large_price_with_decimals() {
        assert_eq!(price_scale(1.5), 100);
        assert_eq!(price_scale(123.456), 1_000);
    }

    #[test]
    fn test_small_price_keeps_significant_digits() {
        // Two significant digits reachable at 7 decimals, floored at 8
        assert_eq!(price_scale(0.000_001_23), 100_000_000);
        assert_eq!(price_scale(0.000_003_3), 100_000_000);
        // Deep sub-unit prices go finer than the 1e8 floor
        assert_eq!(price_scale(0.000_000_001_234), 10_000_000_000);
    }

    #[test]
    fn test_plain_sub_unit_price_uses_floor() {
        assert_eq!(price_scale(0.5), 100_000_000);
        assert_eq!(price_scale(0.123), 100_000_000);
    }
}
