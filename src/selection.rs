//! Shared selection state for one dataset scope: manual strikes and the
//! per-column formula choice. One store is built per scope key and threaded
//! through every component that mutates it; there is no ambient singleton.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::average::{compute_average, excluded_set_for_column, AverageStatus};
use crate::library::FormulaRegistry;
use crate::ratio::cell_ratio;
use crate::triangle::Triangle;
use crate::types::{CellKey, Direction, FormulaId};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SelectionStore {
    strikes: BTreeSet<CellKey>,
    selected: BTreeMap<usize, FormulaId>,
}

/// A full copy of the selection state, as replicated between views and as the
/// in-memory half of the persistence round trip. Applied wholesale: last
/// writer wins at snapshot granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionSnapshot {
    pub strikes: Vec<CellKey>,
    pub selected: Vec<(usize, FormulaId)>,
}

impl SelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strikes(&self) -> &BTreeSet<CellKey> {
        &self.strikes
    }

    pub fn is_struck(&self, key: CellKey) -> bool {
        self.strikes.contains(&key)
    }

    pub fn selected_formula_id(&self, col: usize) -> Option<&FormulaId> {
        self.selected.get(&col)
    }

    /// Flip one cell's strike. Cells that are not computable — masked
    /// operands, zero denominators, the synthetic ultimate column — are not
    /// strike targets; the call is a no-op and reports no change.
    pub fn toggle_strike(&mut self, triangle: &Triangle, row: usize, col: usize) -> bool {
        if triangle.is_ultimate_col(col) || cell_ratio(triangle, row, col).is_none() {
            return false;
        }
        let key = CellKey::new(row, col);
        if !self.strikes.remove(&key) {
            self.strikes.insert(key);
        }
        true
    }

    /// Choose the formula supplying one column's selected ratio. Unknown ids
    /// are rejected rather than silently defaulting.
    pub fn set_column_formula(
        &mut self,
        registry: &FormulaRegistry,
        col: usize,
        id: FormulaId,
    ) -> bool {
        if !registry.contains(&id) {
            return false;
        }
        self.selected.insert(col, id);
        true
    }

    /// Strike the single most extreme not-yet-struck ratio in each column.
    /// Ties go to the first candidate in row order. Returns the newly struck
    /// cells; empty when nothing was strikeable.
    pub fn exclude_extreme(
        &mut self,
        triangle: &Triangle,
        cols: &[usize],
        direction: Direction,
    ) -> Vec<CellKey> {
        let mut struck = Vec::new();
        for &col in cols {
            if triangle.is_ultimate_col(col) {
                continue;
            }
            let mut best: Option<(CellKey, f64)> = None;
            for r in 0..triangle.row_count() {
                let key = CellKey::new(r, col);
                if self.strikes.contains(&key) {
                    continue;
                }
                let Some(ratio) = cell_ratio(triangle, r, col) else {
                    continue;
                };
                let better = match (&best, direction) {
                    (None, _) => true,
                    (Some((_, b)), Direction::High) => ratio > *b,
                    (Some((_, b)), Direction::Low) => ratio < *b,
                };
                if better {
                    best = Some((key, ratio));
                }
            }
            if let Some((key, _)) = best {
                self.strikes.insert(key);
                struck.push(key);
            }
        }
        struck
    }

    /// Clear every strike in the given columns. Returns how many were removed.
    pub fn include_all(&mut self, cols: &[usize]) -> usize {
        let before = self.strikes.len();
        self.strikes.retain(|key| !cols.contains(&key.col));
        before - self.strikes.len()
    }

    /// Lazy default fill: columns without an explicit choice get the scope
    /// default the first time they are rendered, and the entry is sticky
    /// from then on.
    pub fn fill_default_selection(&mut self, registry: &FormulaRegistry, col_count: usize) {
        let Some(default_id) = registry.default_id().cloned() else {
            return;
        };
        for c in 0..col_count {
            self.selected.entry(c).or_insert_with(|| default_id.clone());
        }
    }

    /// The formula that supplies one column's selected ratio. A selection
    /// pointing at a deleted or hidden formula falls back to the scope
    /// default instead of erroring.
    pub fn formula_for<'a>(
        &self,
        registry: &'a FormulaRegistry,
        col: usize,
    ) -> Option<&'a crate::average::FormulaConfig> {
        self.selected
            .get(&col)
            .and_then(|id| registry.get(id))
            .or_else(|| registry.default_id().and_then(|id| registry.get(id)))
    }

    /// Summary ratio per column for projection. The synthetic ultimate column
    /// and any column whose formula has nothing to show render the neutral
    /// `1.0` so missing data never zeroes out an ultimate.
    pub fn selected_ratio_values(
        &self,
        triangle: &Triangle,
        registry: &FormulaRegistry,
    ) -> Vec<f64> {
        let col_count = triangle.ratio_col_count();
        let mut values = vec![1.0; col_count];
        for (c, slot) in values.iter_mut().enumerate() {
            if triangle.is_ultimate_col(c) {
                continue;
            }
            let Some(cfg) = self.formula_for(registry, c) else {
                continue;
            };
            let excluded = excluded_set_for_column(triangle, c, cfg, &self.strikes);
            let outcome = compute_average(triangle, c, &excluded, cfg);
            if outcome.status() == AverageStatus::Value {
                if let Some(v) = outcome.value {
                    *slot = v;
                }
            }
        }
        values
    }

    /// Drop strikes and selections that no longer land on computable cells.
    /// Called when the triangle is replaced; a resize invalidates the keys.
    pub fn prune_stale(&mut self, triangle: &Triangle) {
        self.strikes.retain(|key| {
            !triangle.is_ultimate_col(key.col) && cell_ratio(triangle, key.row, key.col).is_some()
        });
        let col_count = triangle.ratio_col_count();
        self.selected.retain(|&col, _| col < col_count);
    }

    /// Reset to defaults: no strikes, no explicit choices.
    pub fn reset(&mut self) {
        self.strikes.clear();
        self.selected.clear();
    }

    /// Replace the strike set wholesale (saved-pattern load path).
    pub fn replace_strikes(&mut self, strikes: BTreeSet<CellKey>) {
        self.strikes = strikes;
    }

    /// Replace the per-column formula choices wholesale.
    pub fn replace_selection(&mut self, selected: BTreeMap<usize, FormulaId>) {
        self.selected = selected;
    }

    pub fn snapshot(&self) -> SelectionSnapshot {
        SelectionSnapshot {
            strikes: self.strikes.iter().copied().collect(),
            selected: self.selected.iter().map(|(c, id)| (*c, id.clone())).collect(),
        }
    }

    /// Replace the whole state with a snapshot. Malformed entries are
    /// dropped; everything else is applied verbatim.
    pub fn apply_snapshot(&mut self, snapshot: &SelectionSnapshot) {
        self.strikes = snapshot.strikes.iter().copied().collect();
        self.selected = snapshot
            .selected
            .iter()
            .filter(|(_, id)| !id.as_str().is_empty())
            .map(|(c, id)| (*c, id.clone()))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangle::fixtures;

    fn store() -> SelectionStore {
        SelectionStore::new()
    }

    #[test]
    fn toggle_strike_flips_membership() {
        let tri = fixtures::small();
        let mut s = store();
        assert!(s.toggle_strike(&tri, 0, 0));
        assert!(s.is_struck(CellKey::new(0, 0)));
        assert!(s.toggle_strike(&tri, 0, 0));
        assert!(!s.is_struck(CellKey::new(0, 0)));
    }

    #[test]
    fn toggle_strike_refuses_non_computable_cells() {
        let tri = fixtures::small();
        let mut s = store();
        // Row 2022 has no dev-24 observation.
        assert!(!s.toggle_strike(&tri, 2, 0));
        // Ultimate column is never strikeable.
        assert!(!s.toggle_strike(&tri, 0, 2));
        assert!(s.strikes().is_empty());
    }

    #[test]
    fn set_column_formula_rejects_unknown_ids() {
        let reg = FormulaRegistry::with_builtins();
        let mut s = store();
        assert!(!s.set_column_formula(&reg, 0, FormulaId::from("ghost")));
        assert_eq!(s.selected_formula_id(0), None);
        assert!(s.set_column_formula(&reg, 0, FormulaId::from("simple_8")));
        assert_eq!(s.selected_formula_id(0), Some(&FormulaId::from("simple_8")));
    }

    #[test]
    fn exclude_extreme_strikes_one_per_invocation() {
        let tri = fixtures::small();
        let mut s = store();
        // Column 0 ratios: 1.5 (row 0), 1.4545 (row 1).
        let first = s.exclude_extreme(&tri, &[0], Direction::High);
        assert_eq!(first, vec![CellKey::new(0, 0)]);
        let second = s.exclude_extreme(&tri, &[0], Direction::High);
        assert_eq!(second, vec![CellKey::new(1, 0)]);
        // Everything struck: nothing left to exclude.
        assert!(s.exclude_extreme(&tri, &[0], Direction::High).is_empty());
    }

    #[test]
    fn exclude_extreme_low_picks_smallest() {
        let tri = fixtures::small();
        let mut s = store();
        let struck = s.exclude_extreme(&tri, &[0], Direction::Low);
        assert_eq!(struck, vec![CellKey::new(1, 0)]);
    }

    #[test]
    fn exclude_extreme_tie_goes_to_first_row() {
        let mut tri = fixtures::small();
        // Make both candidate ratios identical.
        tri.values[1][1] = Some(165.0); // 165/110 = 1.5
        let mut s = store();
        let struck = s.exclude_extreme(&tri, &[0], Direction::High);
        assert_eq!(struck, vec![CellKey::new(0, 0)]);
    }

    #[test]
    fn include_all_round_trips_the_average() {
        let tri = fixtures::small();
        let reg = FormulaRegistry::with_builtins();
        let mut s = store();
        let before = s.selected_ratio_values(&tri, &reg);

        s.toggle_strike(&tri, 0, 0);
        s.exclude_extreme(&tri, &[0, 1], Direction::High);
        assert!(!s.strikes().is_empty());

        let removed = s.include_all(&[0, 1]);
        assert!(removed > 0);
        assert!(s.strikes().is_empty());
        assert_eq!(s.selected_ratio_values(&tri, &reg), before);
    }

    #[test]
    fn include_all_leaves_other_columns_alone() {
        let tri = fixtures::small();
        let mut s = store();
        s.toggle_strike(&tri, 0, 0);
        s.toggle_strike(&tri, 0, 1);
        s.include_all(&[1]);
        assert!(s.is_struck(CellKey::new(0, 0)));
        assert!(!s.is_struck(CellKey::new(0, 1)));
    }

    #[test]
    fn default_fill_is_sticky() {
        let reg = FormulaRegistry::with_builtins();
        let mut s = store();
        s.set_column_formula(&reg, 1, FormulaId::from("simple_8"));
        s.fill_default_selection(&reg, 3);
        assert_eq!(s.selected_formula_id(0), Some(&FormulaId::from("volume_all")));
        assert_eq!(s.selected_formula_id(1), Some(&FormulaId::from("simple_8")));
        assert_eq!(s.selected_formula_id(2), Some(&FormulaId::from("volume_all")));
    }

    #[test]
    fn formula_for_falls_back_when_selection_deleted() {
        let mut reg = FormulaRegistry::with_builtins();
        let id = reg
            .add_custom("Mine", crate::average::AverageBase::Simple, crate::average::Periods::All, 0)
            .unwrap();
        let mut s = store();
        s.set_column_formula(&reg, 0, id.clone());
        reg.remove(&id).unwrap();
        let cfg = s.formula_for(&reg, 0).unwrap();
        assert_eq!(cfg.label, "Volume - all");
    }

    #[test]
    fn selected_values_default_to_volume_all() {
        let tri = fixtures::small();
        let reg = FormulaRegistry::with_builtins();
        let s = store();
        let values = s.selected_ratio_values(&tri, &reg);
        assert_eq!(values.len(), 3);
        assert!((values[0] - 310.0 / 210.0).abs() < 1e-12);
        assert!((values[1] - 1.2).abs() < 1e-12);
        assert_eq!(values[2], 1.0); // synthetic ultimate column
    }

    #[test]
    fn fully_struck_column_renders_neutral_one() {
        let tri = fixtures::small();
        let reg = FormulaRegistry::with_builtins();
        let mut s = store();
        s.toggle_strike(&tri, 0, 1); // the only candidate in column 1
        let values = s.selected_ratio_values(&tri, &reg);
        assert_eq!(values[1], 1.0);
    }

    #[test]
    fn prune_stale_drops_keys_outside_new_shape() {
        let tri = fixtures::small();
        let mut s = store();
        s.toggle_strike(&tri, 0, 0);
        s.toggle_strike(&tri, 0, 1);

        // Reload with a narrower triangle: dev 36 column gone.
        let narrow = Triangle {
            values: vec![
                vec![Some(100.0), Some(150.0)],
                vec![Some(110.0), Some(160.0)],
                vec![Some(120.0), None],
            ],
            mask: vec![
                vec![true, true],
                vec![true, true],
                vec![true, false],
            ],
            origin_labels: vec!["2020".into(), "2021".into(), "2022".into()],
            dev_labels: vec!["12".into(), "24".into()],
            mtime: None,
        };
        s.prune_stale(&narrow);
        assert!(s.is_struck(CellKey::new(0, 0)));
        assert!(!s.is_struck(CellKey::new(0, 1)));
    }

    #[test]
    fn snapshot_round_trip_is_lossless() {
        let tri = fixtures::small();
        let reg = FormulaRegistry::with_builtins();
        let mut s = store();
        s.toggle_strike(&tri, 0, 0);
        s.set_column_formula(&reg, 1, FormulaId::from("simple_8"));

        let snap = s.snapshot();
        let mut other = store();
        other.apply_snapshot(&snap);
        assert_eq!(other, s);
    }

    #[test]
    fn apply_snapshot_replaces_rather_than_merges() {
        let tri = fixtures::small();
        let mut a = store();
        a.toggle_strike(&tri, 0, 0);
        let snap = a.snapshot();

        let mut b = store();
        b.toggle_strike(&tri, 0, 1);
        b.apply_snapshot(&snap);
        assert!(b.is_struck(CellKey::new(0, 0)));
        assert!(!b.is_struck(CellKey::new(0, 1)));
    }
}
