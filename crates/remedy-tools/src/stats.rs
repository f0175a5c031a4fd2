//! Descriptive statistics over the numeric values of a column.
//!
//! A JSON value is numeric iff it is a JSON number. Booleans are never
//! numeric, even though some languages treat them as integers.

use serde_json::Value;

pub fn is_number(value: &Value) -> bool {
    matches!(value, Value::Number(_))
}

/// The value as `f64` when it is numeric.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(f64::total_cmp);
    out
}

fn median_of_sorted(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some(sorted[n / 2 - 1] / 2.0 + sorted[n / 2] / 2.0)
    }
}

/// Clamp an overflowed result back into the finite range.
pub fn saturate(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(f64::MIN, f64::MAX)
    }
}

/// Running mean; never overflows for finite inputs.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut mean = 0.0;
    for (i, v) in values.iter().enumerate() {
        let k = (i + 1) as f64;
        mean = mean - mean / k + v / k;
    }
    Some(mean)
}

pub fn median(values: &[f64]) -> Option<f64> {
    median_of_sorted(&sorted(values))
}

/// Most frequent value; ties resolve to the smallest value.
pub fn mode(values: &[f64]) -> Option<f64> {
    let sorted = sorted(values);
    let mut best: Option<(f64, usize)> = None;
    let mut i = 0;
    while i < sorted.len() {
        let value = sorted[i];
        let mut run = 1;
        while i + run < sorted.len() && sorted[i + run] == value {
            run += 1;
        }
        if best.map_or(true, |(_, count)| run > count) {
            best = Some((value, run));
        }
        i += run;
    }
    best.map(|(value, _)| value)
}

/// Sample standard deviation (n - 1 denominator); 0.0 under two values.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    // Scale into [-1, 1] so squared deviations stay finite.
    let scale = values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if scale == 0.0 {
        return 0.0;
    }
    let scaled: Vec<f64> = values.iter().map(|v| v / scale).collect();
    let mean = mean(&scaled).unwrap_or(0.0);
    let sum_sq: f64 = scaled.iter().map(|v| (v - mean).powi(2)).sum();
    saturate((sum_sq / (values.len() - 1) as f64).sqrt() * scale)
}

/// First and third quartiles.
///
/// Uses the inclusive four-quantile method (linear interpolation between
/// order statistics, positions `i * (n - 1) / 4`). Inputs too small for it
/// fall back to the median of each half of the sorted values, the middle
/// element excluded; a lone value is its own quartiles.
pub fn quartiles(values: &[f64]) -> Option<(f64, f64)> {
    let sorted = sorted(values);
    let n = sorted.len();
    if n < 2 {
        return split_quartiles(&sorted);
    }
    let q = |i: usize| {
        let m = n - 1;
        let j = i * m / 4;
        let t = (i * m % 4) as f64 / 4.0;
        sorted[j] * (1.0 - t) + sorted[j + 1] * t
    };
    Some((q(1), q(3)))
}

/// Quartiles from the halves of the sorted values, excluding the middle
/// element when the count is odd.
pub fn split_quartiles(values: &[f64]) -> Option<(f64, f64)> {
    let sorted = sorted(values);
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    let lower = &sorted[..mid];
    let upper = if n % 2 == 1 { &sorted[mid + 1..] } else { &sorted[mid..] };
    let q1 = median_of_sorted(lower).unwrap_or(sorted[mid]);
    let q3 = median_of_sorted(upper).unwrap_or(sorted[mid]);
    Some((q1, q3))
}

/// Median of numeric JSON values.
///
/// An odd count returns the middle value unchanged (integers stay integers);
/// an even count returns the float mean of the middle pair.
pub fn median_value(values: &[&Value]) -> Option<Value> {
    let mut numeric: Vec<(&Value, f64)> = values
        .iter()
        .filter_map(|v| as_number(v).map(|x| (*v, x)))
        .collect();
    numeric.sort_by(|a, b| a.1.total_cmp(&b.1));
    let n = numeric.len();
    if n == 0 {
        return None;
    }
    if n % 2 == 1 {
        Some(numeric[n / 2].0.clone())
    } else {
        Some(Value::from(numeric[n / 2 - 1].1 / 2.0 + numeric[n / 2].1 / 2.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn booleans_are_not_numbers() {
        assert!(!is_number(&json!(true)));
        assert!(as_number(&json!(false)).is_none());
        assert!(is_number(&json!(3)));
        assert_eq!(as_number(&json!(-2.5)), Some(-2.5));
        assert!(as_number(&json!("7")).is_none());
        assert!(as_number(&Value::Null).is_none());
    }

    #[test]
    fn mean_and_median() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, 2.0, 3.0, 4.0, 100.0]), Some(22.0));
        assert_eq!(median(&[100.0, 1.0, 3.0]), Some(3.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn mode_prefers_smallest_on_tie() {
        assert_eq!(mode(&[5.0, 3.0, 5.0, 3.0, 9.0]), Some(3.0));
        assert_eq!(mode(&[2.0, 7.0, 7.0]), Some(7.0));
        assert_eq!(mode(&[]), None);
    }

    #[test]
    fn sample_std_uses_n_minus_one() {
        assert_eq!(sample_std(&[4.0]), 0.0);
        let std = sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((std - 2.138089935299395).abs() < 1e-12);
    }

    #[test]
    fn quartiles_inclusive_method() {
        assert_eq!(quartiles(&[1.0, 2.0, 3.0, 4.0, 100.0]), Some((2.0, 4.0)));
        assert_eq!(quartiles(&[-5.0, 1.0, 2.0, 1000.0]), Some((-0.5, 251.5)));
        assert_eq!(quartiles(&[3.0, 1.0]), Some((1.5, 2.5)));
    }

    #[test]
    fn quartiles_degenerate_inputs() {
        assert_eq!(quartiles(&[]), None);
        assert_eq!(quartiles(&[42.0]), Some((42.0, 42.0)));
    }

    #[test]
    fn split_quartiles_excludes_middle_element() {
        assert_eq!(split_quartiles(&[1.0, 2.0, 3.0, 4.0, 100.0]), Some((1.5, 52.0)));
        assert_eq!(split_quartiles(&[1.0, 2.0, 3.0, 4.0]), Some((1.5, 3.5)));
        assert_eq!(split_quartiles(&[9.0]), Some((9.0, 9.0)));
    }

    #[test]
    fn median_value_keeps_integers_for_odd_counts() {
        let vals = [json!(3), json!(1), json!(2)];
        let refs: Vec<&Value> = vals.iter().collect();
        assert_eq!(median_value(&refs), Some(json!(2)));

        let vals = [json!(1), json!(2), json!(3), json!(4)];
        let refs: Vec<&Value> = vals.iter().collect();
        assert_eq!(median_value(&refs), Some(json!(2.5)));

        assert_eq!(median_value(&[]), None);
    }
}
