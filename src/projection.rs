//! Cumulative development factors and ultimate projection: right-to-left
//! product of the selected ratios, then ultimate = latest diagonal value ×
//! the factor at its column.

use crate::library::FormulaRegistry;
use crate::selection::SelectionStore;
use crate::triangle::Triangle;

/// Right-to-left running product of the selected ratios. A missing ratio is
/// an unresolvable link: every factor to its left is None — the chain cannot
/// be estimated through a gap.
pub fn compute_cumulative(selected: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut factors = vec![None; selected.len()];
    let mut running: Option<f64> = None;
    for i in (0..selected.len()).rev() {
        let Some(v) = selected[i].filter(|v| v.is_finite()) else {
            running = None;
            continue;
        };
        running = match running {
            _ if i == selected.len() - 1 => Some(v),
            Some(acc) => Some(v * acc),
            None => {
                // Upstream gap already poisoned the chain.
                continue;
            }
        };
        factors[i] = running;
    }
    factors
}

/// Projected ultimate per origin row; None where the row has no observations
/// or its latest column's factor is undefined (rendered blank, never zero).
pub fn project_ultimates(
    triangle: &Triangle,
    factors: &[Option<f64>],
) -> Vec<Option<f64>> {
    (0..triangle.row_count())
        .map(|r| {
            let latest = triangle.latest_diagonal(r)?;
            let factor = factors.get(latest.col).copied().flatten()?;
            Some(latest.value * factor)
        })
        .collect()
}

/// Convenience: factors and ultimates straight from the live selection.
pub fn project(
    triangle: &Triangle,
    store: &SelectionStore,
    registry: &FormulaRegistry,
) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let selected: Vec<Option<f64>> = store
        .selected_ratio_values(triangle, registry)
        .into_iter()
        .map(Some)
        .collect();
    let factors = compute_cumulative(&selected);
    let ultimates = project_ultimates(triangle, &factors);
    (factors, ultimates)
}
