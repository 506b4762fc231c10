//! The averaging formula library: volume-weighted vs simple means over a
//! ratio column, with "most recent N" windows and symmetric high/low
//! auto-exclusion layered over manual strikes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ratio::cell_ratio;
use crate::triangle::Triangle;
use crate::types::CellKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AverageBase {
    /// Ratio of sums: Σ numerator / Σ denominator, weighting rows by size.
    Volume,
    /// Arithmetic mean of the per-row ratios.
    Simple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Periods {
    All,
    /// Most recent `n` valid rows, counted up from the latest origin.
    Recent(u32),
}

/// One named averaging formula. The three parameters fully determine the
/// computation; there is no per-formula code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaConfig {
    pub label: String,
    pub base: AverageBase,
    pub periods: Periods,
    /// Symmetric high/low auto-exclusion count, clamped at compute time so at
    /// least one candidate survives.
    pub exclude: u32,
}

/// Result of reducing one column under one formula.
#[derive(Debug, Clone, PartialEq)]
pub struct AverageOutcome {
    pub base: AverageBase,
    pub sum_a: f64,
    pub sum_b: f64,
    pub sum: f64,
    /// Computable ratios seen, whether or not they were excluded.
    pub total_valid: usize,
    /// Ratios that actually entered the reduction.
    pub total_included: usize,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AverageStatus {
    /// A real average was computed.
    Value,
    /// Valid rows exist but every one was excluded; render the neutral
    /// placeholder with a dimmed affordance.
    AllExcluded,
    /// Nothing to average at all; render the neutral placeholder.
    NoCandidates,
}

impl AverageOutcome {
    fn empty(base: AverageBase) -> Self {
        AverageOutcome {
            base,
            sum_a: 0.0,
            sum_b: 0.0,
            sum: 0.0,
            total_valid: 0,
            total_included: 0,
            value: None,
        }
    }

    pub fn status(&self) -> AverageStatus {
        if self.total_valid > 0 && self.total_included == 0 {
            return AverageStatus::AllExcluded;
        }
        let has_value = self.value.is_some()
            && match self.base {
                AverageBase::Volume => self.sum_a != 0.0,
                AverageBase::Simple => self.total_included > 0,
            };
        if has_value { AverageStatus::Value } else { AverageStatus::NoCandidates }
    }

    /// The summary ratio, or None when only a placeholder should render.
    pub fn summary_value(&self) -> Option<f64> {
        match self.status() {
            AverageStatus::Value => self.value,
            _ => None,
        }
    }
}

/// Reduce one column's ratios under `formula`, honouring the excluded-cell
/// set (manual strikes merged with any auto-exclusion).
///
/// Windowed formulas walk rows from the latest origin backwards and stop once
/// `n` rows have been picked; excluded rows do not consume window slots. A
/// zero-valued denominator row in volume mode contributes nothing to the sums
/// but still counts as included.
pub fn compute_average(
    triangle: &Triangle,
    col: usize,
    excluded: &BTreeSet<CellKey>,
    formula: &FormulaConfig,
) -> AverageOutcome {
    let mut out = AverageOutcome::empty(formula.base);
    if triangle.is_ultimate_col(col) {
        return out;
    }

    let rows = triangle.row_count();
    let lookback = match formula.periods {
        Periods::All => None,
        Periods::Recent(n) if n > 0 => Some(n as usize),
        Periods::Recent(_) => None,
    };

    let order: Vec<usize> = match lookback {
        Some(_) => (0..rows).rev().collect(),
        None => (0..rows).collect(),
    };

    let mut picked = 0usize;
    for r in order {
        if let Some(limit) = lookback {
            if picked >= limit {
                break;
            }
        }
        let Some(ratio) = cell_ratio(triangle, r, col) else {
            continue;
        };
        out.total_valid += 1;
        if excluded.contains(&CellKey::new(r, col)) {
            continue;
        }
        picked += 1;
        out.total_included += 1;
        match formula.base {
            AverageBase::Volume => {
                if let (Some(a), Some(b)) = (triangle.cell(r, col), triangle.cell(r, col + 1)) {
                    out.sum_a += a;
                    out.sum_b += b;
                }
            }
            AverageBase::Simple => out.sum += ratio,
        }
    }

    out.value = match formula.base {
        AverageBase::Volume => (out.sum_a != 0.0).then(|| out.sum_b / out.sum_a),
        AverageBase::Simple => {
            (out.total_included > 0).then(|| out.sum / out.total_included as f64)
        }
    };

    out
}

/// Merge the formula's symmetric high/low auto-exclusion into `base_excluded`
/// for one column. Candidates are the rows that would otherwise be included
/// (window applied, manual strikes removed); the exclusion count is clamped
/// to `floor(candidates / 2)` so at least one ratio survives whenever any
/// exist. Computed fresh per call — the auto set is never persisted.
pub fn excluded_set_for_column(
    triangle: &Triangle,
    col: usize,
    formula: &FormulaConfig,
    base_excluded: &BTreeSet<CellKey>,
) -> BTreeSet<CellKey> {
    if formula.exclude == 0 || triangle.is_ultimate_col(col) {
        return base_excluded.clone();
    }

    let rows = triangle.row_count();
    let lookback = match formula.periods {
        Periods::All => None,
        Periods::Recent(n) if n > 0 => Some(n as usize),
        Periods::Recent(_) => None,
    };

    let mut candidates: Vec<(usize, f64)> = Vec::new();
    match lookback {
        Some(limit) => {
            for r in (0..rows).rev() {
                if candidates.len() >= limit {
                    break;
                }
                let Some(ratio) = cell_ratio(triangle, r, col) else {
                    continue;
                };
                if base_excluded.contains(&CellKey::new(r, col)) {
                    continue;
                }
                candidates.push((r, ratio));
            }
        }
        None => {
            for r in 0..rows {
                let Some(ratio) = cell_ratio(triangle, r, col) else {
                    continue;
                };
                if base_excluded.contains(&CellKey::new(r, col)) {
                    continue;
                }
                candidates.push((r, ratio));
            }
        }
    }

    let n = (formula.exclude as usize).min(candidates.len() / 2);
    if n == 0 {
        return base_excluded.clone();
    }

    let mut sorted = candidates;
    sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut merged = base_excluded.clone();
    for i in 0..n {
        merged.insert(CellKey::new(sorted[i].0, col));
        merged.insert(CellKey::new(sorted[sorted.len() - 1 - i].0, col));
    }
    merged
}

// ── Input normalisation (formula editor semantics) ───────────────────────────

/// `""` / `"all"` → All; positive numbers floored; everything else All.
pub fn parse_periods(raw: &str) -> Periods {
    let t = raw.trim();
    if t.is_empty() || t.eq_ignore_ascii_case("all") {
        return Periods::All;
    }
    match t.parse::<f64>() {
        Ok(n) if n.is_finite() && n > 0.0 => Periods::Recent(n.floor() as u32),
        _ => Periods::All,
    }
}

/// `""` / `"none"` → 0; positive numbers floored; everything else 0.
pub fn parse_exclude(raw: &str) -> u32 {
    let t = raw.trim();
    if t.is_empty() || t.eq_ignore_ascii_case("none") {
        return 0;
    }
    match t.parse::<f64>() {
        Ok(n) if n.is_finite() && n > 0.0 => n.floor() as u32,
        _ => 0,
    }
}

/// Default label for a formula: `"Volume - all"`, `"Simple - 5"`, with an
/// `"Ex hi/lo"` / `"Ex hi/lo xN"` suffix when auto-exclusion is on.
pub fn auto_name(base: AverageBase, periods: Periods, exclude: u32) -> String {
    let base_label = match base {
        AverageBase::Volume => "Volume",
        AverageBase::Simple => "Simple",
    };
    let suffix = match periods {
        Periods::All => "all".to_string(),
        Periods::Recent(n) => n.to_string(),
    };
    let name = format!("{base_label} - {suffix}");
    match exclude {
        0 => name,
        1 => format!("{name} Ex hi/lo"),
        n => format!("{name} Ex hi/lo x{n}"),
    }
}
