use serde::Deserialize;

/// An origin × development matrix of cumulative loss values with a parallel
/// presence mask. Immutable once loaded; a dataset reload replaces the whole
/// model rather than mutating it.
///
/// Invariant: `mask[r][c]` is true iff `values[r][c]` is a meaningful
/// observation. A cell with `mask = false` is absent no matter what value is
/// stored alongside it.
#[derive(Debug, Clone, Deserialize)]
pub struct Triangle {
    pub values: Vec<Vec<Option<f64>>>,
    pub mask: Vec<Vec<bool>>,
    pub origin_labels: Vec<String>,
    pub dev_labels: Vec<String>,
    #[serde(default)]
    pub mtime: Option<u64>,
}

/// Value and column of the most recent observed cell in one origin row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiagonalCell {
    pub value: f64,
    pub col: usize,
}

impl Triangle {
    pub fn row_count(&self) -> usize {
        self.origin_labels.len()
    }

    /// Development labels truncated to the widest stored row. Datasets are
    /// sometimes delivered with more labels than data columns; the extras
    /// carry no cells and are dropped from every downstream computation.
    pub fn effective_dev_labels(&self) -> &[String] {
        let max_cols = self.values.iter().map(Vec::len).max().unwrap_or(0);
        if max_cols == 0 || max_cols >= self.dev_labels.len() {
            &self.dev_labels
        } else {
            &self.dev_labels[..max_cols]
        }
    }

    /// Number of ratio columns, including the synthetic ultimate column.
    pub fn ratio_col_count(&self) -> usize {
        self.effective_dev_labels().len()
    }

    /// Index of the last real (non-synthetic) ratio column, if any exist.
    pub fn last_real_ratio_col(&self) -> Option<usize> {
        let devs = self.effective_dev_labels().len();
        devs.checked_sub(2)
    }

    pub fn is_ultimate_col(&self, col: usize) -> bool {
        col + 1 >= self.effective_dev_labels().len()
    }

    /// The observed value at `(row, col)`, gated by the mask.
    pub fn cell(&self, row: usize, col: usize) -> Option<f64> {
        if !*self.mask.get(row)?.get(col)? {
            return None;
        }
        let v = (*self.values.get(row)?.get(col)?)?;
        v.is_finite().then_some(v)
    }

    /// Rightmost present cell of one origin row, scanned from the row's last
    /// possible development column. None for rows with no observations.
    pub fn latest_diagonal(&self, row: usize) -> Option<DiagonalCell> {
        let dev_count = self.effective_dev_labels().len();
        let row_len = self.values.get(row)?.len();
        let max_col = dev_count.min(row_len).checked_sub(1)?;
        (0..=max_col)
            .rev()
            .find_map(|c| self.cell(row, c).map(|value| DiagonalCell { value, col: c }))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_respects_mask_over_stored_value() {
        let mut tri = fixtures::small();
        // A stored value behind a false mask must be invisible.
        tri.values[2][1] = Some(999.0);
        assert_eq!(tri.cell(2, 1), None);
        assert_eq!(tri.cell(0, 1), Some(150.0));
    }

    #[test]
    fn effective_dev_labels_truncates_to_widest_row() {
        let mut tri = fixtures::small();
        tri.dev_labels.push("48".into());
        tri.dev_labels.push("60".into());
        assert_eq!(tri.effective_dev_labels(), &["12", "24", "36"]);
    }

    #[test]
    fn effective_dev_labels_keeps_labels_when_rows_are_wider() {
        let tri = fixtures::small();
        assert_eq!(tri.effective_dev_labels().len(), 3);
    }

    #[test]
    fn latest_diagonal_walks_back_over_missing_cells() {
        let tri = fixtures::small();
        assert_eq!(tri.latest_diagonal(0), Some(DiagonalCell { value: 180.0, col: 2 }));
        assert_eq!(tri.latest_diagonal(1), Some(DiagonalCell { value: 160.0, col: 1 }));
        assert_eq!(tri.latest_diagonal(2), Some(DiagonalCell { value: 120.0, col: 0 }));
    }

    #[test]
    fn latest_diagonal_none_for_fully_masked_row() {
        let mut tri = fixtures::small();
        tri.mask[2] = vec![false, false, false];
        assert_eq!(tri.latest_diagonal(2), None);
    }

    #[test]
    fn ingestion_json_deserializes() {
        let json = r#"{
            "values": [[100, 150], [110, null]],
            "mask": [[true, true], [true, false]],
            "origin_labels": ["2023", "2024"],
            "dev_labels": ["12", "24"],
            "mtime": 1724900000
        }"#;
        let tri: Triangle = serde_json::from_str(json).unwrap();
        assert_eq!(tri.row_count(), 2);
        assert_eq!(tri.cell(0, 1), Some(150.0));
        assert_eq!(tri.cell(1, 1), None);
        assert_eq!(tri.mtime, Some(1724900000));
    }
}
