//! Link-ratio derivation: period-over-period development factors for one
//! triangle column, plus the display rounding and header-label rules shared
//! by every consumer.

use crate::triangle::Triangle;

/// Development factor `b / a`. None when either operand is non-finite or the
/// denominator is zero — "not computable", which is distinct from "excluded".
pub fn calc_ratio(a: f64, b: f64) -> Option<f64> {
    if !a.is_finite() || !b.is_finite() || a == 0.0 {
        return None;
    }
    let v = b / a;
    v.is_finite().then_some(v)
}

/// Link ratio for one cell, gated by the presence mask of both endpoints.
pub fn cell_ratio(triangle: &Triangle, row: usize, col: usize) -> Option<f64> {
    let a = triangle.cell(row, col)?;
    let b = triangle.cell(row, col + 1)?;
    calc_ratio(a, b)
}

/// Ordered `(row, ratio)` pairs for one ratio column. The synthetic ultimate
/// column has no denominator and yields no candidates.
pub fn column_candidates(triangle: &Triangle, col: usize) -> Vec<(usize, f64)> {
    if triangle.is_ultimate_col(col) {
        return Vec::new();
    }
    (0..triangle.row_count())
        .filter_map(|r| cell_ratio(triangle, r, col).map(|v| (r, v)))
        .collect()
}

/// Internal precision: ratios are rounded to 6 decimal digits before display
/// formatting so two views never disagree in the last shown digit.
pub fn round_ratio(value: f64, decimals: u32) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    let f = 10f64.powi(decimals as i32);
    Some((value * f).round() / f)
}

/// Fixed 4-decimal display string, trailing zeros kept. Non-finite values
/// render blank; the caller decides whether blank means NA or placeholder.
pub fn format_ratio(value: f64, decimals: usize) -> String {
    if !value.is_finite() {
        return String::new();
    }
    format!("{value:.decimals$}")
}

/// First numeric token in a label (`"12m"` → `"12"`, `"dev 24"` → `"24"`).
fn numeric_token(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    let digit_at = |i: usize| bytes.get(i).is_some_and(u8::is_ascii_digit);
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let starts = b.is_ascii_digit()
            || (b == b'.' && digit_at(i + 1))
            || ((b == b'+' || b == b'-')
                && (digit_at(i + 1) || (bytes.get(i + 1) == Some(&b'.') && digit_at(i + 2))));
        if !starts {
            i += 1;
            continue;
        }
        let start = i;
        let mut j = i;
        if bytes[j] == b'+' || bytes[j] == b'-' {
            j += 1;
        }
        let mut seen_dot = false;
        while j < bytes.len() {
            match bytes[j] {
                b'0'..=b'9' => j += 1,
                b'.' if !seen_dot && digit_at(j + 1) => {
                    seen_dot = true;
                    j += 1;
                }
                _ => break,
            }
        }
        return Some(&s[start..j]);
    }
    None
}

/// Header labels for the ratio columns: adjacent dev labels paired by their
/// numeric prefixes (`"12"/"24"` → `"12-24"`), raw pair as fallback, and a
/// trailing synthetic age-to-ultimate column.
pub fn ratio_header_labels(devs: &[String]) -> Vec<String> {
    let mut labels = Vec::new();
    for c in 0..devs.len().saturating_sub(1) {
        match (numeric_token(&devs[c]), numeric_token(&devs[c + 1])) {
            (Some(l), Some(r)) => labels.push(format!("{l}-{r}")),
            _ => labels.push(format!("{}-{}", devs[c], devs[c + 1])),
        }
    }

    if let Some(last) = devs.last() {
        let left = match numeric_token(last) {
            Some(num) => num.to_string(),
            None => {
                let t = last.trim();
                if t.is_empty() { "Ult".to_string() } else { t.to_string() }
            }
        };
        if left.eq_ignore_ascii_case("ult") {
            labels.push("Ult".to_string());
        } else {
            labels.push(format!("{left} - Ult"));
        }
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangle::fixtures;

    #[test]
    fn calc_ratio_divides_next_by_current() {
        assert_eq!(calc_ratio(100.0, 150.0), Some(1.5));
    }

    #[test]
    fn calc_ratio_zero_denominator_is_not_computable() {
        assert_eq!(calc_ratio(0.0, 150.0), None);
    }

    #[test]
    fn calc_ratio_rejects_non_finite_operands() {
        assert_eq!(calc_ratio(f64::NAN, 1.0), None);
        assert_eq!(calc_ratio(1.0, f64::INFINITY), None);
    }

    #[test]
    fn column_candidates_skip_masked_rows() {
        let tri = fixtures::small();
        // Column 0: rows 2020 and 2021 have both endpoints; 2022 does not.
        let c0 = column_candidates(&tri, 0);
        assert_eq!(c0, vec![(0, 1.5), (1, 160.0 / 110.0)]);
        // Column 1: only 2020 reaches dev 36.
        let c1 = column_candidates(&tri, 1);
        assert_eq!(c1, vec![(0, 1.2)]);
    }

    #[test]
    fn ultimate_column_has_no_candidates() {
        let tri = fixtures::small();
        assert!(column_candidates(&tri, 2).is_empty());
    }

    #[test]
    fn round_then_format_pads_trailing_zeros() {
        let rounded = round_ratio(1.2923076923, 6).unwrap();
        assert_eq!(format_ratio(rounded, 4), "1.2923");
        assert_eq!(format_ratio(1.5, 4), "1.5000");
    }

    #[test]
    fn format_ratio_blank_for_non_finite() {
        assert_eq!(format_ratio(f64::NAN, 4), "");
    }

    #[test]
    fn header_labels_pair_numeric_prefixes() {
        let devs: Vec<String> = ["12", "24", "36"].map(String::from).into();
        assert_eq!(ratio_header_labels(&devs), vec!["12-24", "24-36", "36 - Ult"]);
    }

    #[test]
    fn header_labels_strip_unit_suffixes() {
        let devs: Vec<String> = ["12m", "24m"].map(String::from).into();
        assert_eq!(ratio_header_labels(&devs), vec!["12-24", "24 - Ult"]);
    }

    #[test]
    fn header_labels_fall_back_to_raw_pair() {
        let devs: Vec<String> = ["early", "late"].map(String::from).into();
        assert_eq!(ratio_header_labels(&devs), vec!["early-late", "late - Ult"]);
    }

    #[test]
    fn header_labels_collapse_explicit_ult() {
        let devs: Vec<String> = ["12", "Ult"].map(String::from).into();
        assert_eq!(ratio_header_labels(&devs), vec!["12-Ult", "Ult"]);
    }
}
