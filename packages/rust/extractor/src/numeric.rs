//! Locale-aware numeric cell parsing for B3 tables.
//!
//! The page renders integers with `.` as thousands separator and percentages
//! with three fractional digits behind a `,`. Read as grouped integers, the
//! percentages come out 1000 times too large, hence [`PERCENT_SCALE`].

use indexflow_shared::{IndexFlowError, Result};

/// Divisor correcting the scale artifact of percentage columns.
pub const PERCENT_SCALE: f64 = 1000.0;

/// Parse a quantity such as `4.394.835.131`. Empty cells yield 0.
pub fn parse_quantity(cell: &str) -> Result<i64> {
    let digits: String = cell
        .chars()
        .filter(|c| *c != '.' && !c.is_whitespace())
        .collect();

    if digits.is_empty() {
        return Ok(0);
    }

    digits
        .parse::<u64>()
        .ok()
        .and_then(|v| i64::try_from(v).ok())
        .ok_or_else(|| IndexFlowError::malformed(format!("invalid quantity cell '{cell}'")))
}

/// Parse a percentage such as `10,523` into `10.523`. Empty cells yield 0.0.
pub fn parse_percentage(cell: &str) -> Result<f64> {
    let digits: String = cell
        .chars()
        .filter(|c| !matches!(c, '.' | ',' | '%') && !c.is_whitespace())
        .collect();

    if digits.is_empty() {
        return Ok(0.0);
    }

    let raw = digits
        .parse::<u64>()
        .map_err(|_| IndexFlowError::malformed(format!("invalid percentage cell '{cell}'")))?;

    Ok(raw as f64 / PERCENT_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn quantity_strips_thousands_separators() {
        assert_eq!(parse_quantity("4.394.835.131").unwrap(), 4_394_835_131);
        assert_eq!(parse_quantity(" 12 ").unwrap(), 12);
        assert_eq!(parse_quantity("").unwrap(), 0);
    }

    #[test]
    fn quantity_rejects_garbage_and_negatives() {
        assert!(parse_quantity("n/a").is_err());
        assert!(parse_quantity("-5").is_err());
        assert!(parse_quantity("18.007.142,24").is_err());
    }

    #[test]
    fn percentage_is_scale_corrected() {
        assert!((parse_percentage("10,523").unwrap() - 10.523).abs() < 1e-9);
        assert!((parse_percentage("0,456").unwrap() - 0.456).abs() < 1e-9);
        assert!((parse_percentage("100,000").unwrap() - 100.0).abs() < 1e-9);
        assert_eq!(parse_percentage("").unwrap(), 0.0);
    }

    #[test]
    fn percentage_rejects_garbage() {
        let err = parse_percentage("abc").unwrap_err();
        assert!(err.to_string().contains("malformed table"));
    }

    proptest! {
        #[test]
        fn raw_values_up_to_1000_land_in_unit_interval(raw in 0u32..=1000) {
            let cell = format!("{},{:03}", raw / 1000, raw % 1000);
            let value = parse_percentage(&cell).unwrap();
            prop_assert!((0.0..=1.0).contains(&value));
            prop_assert!((value - f64::from(raw) / PERCENT_SCALE).abs() < 1e-12);
        }

        #[test]
        fn grouped_quantities_roundtrip(n in 0i64..=i64::MAX / 2) {
            let plain = n.to_string();
            let mut grouped = String::new();
            for (i, ch) in plain.chars().enumerate() {
                if i > 0 && (plain.len() - i) % 3 == 0 {
                    grouped.push('.');
                }
                grouped.push(ch);
            }
            prop_assert_eq!(parse_quantity(&grouped).unwrap(), n);
        }
    }
}
