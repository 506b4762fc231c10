//! Ordered registry of averaging formulas: a fixed set of built-ins that can
//! be hidden but never deleted, plus user-defined customs that can be
//! renamed and removed. Both kinds aggregate identically; only their
//! lifecycle rules differ.

use std::collections::BTreeSet;
use std::fmt;

use crate::average::{AverageBase, FormulaConfig, Periods, auto_name};
use crate::types::FormulaId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaKind {
    Builtin,
    Custom,
}

#[derive(Debug, Clone)]
pub struct FormulaRow {
    pub id: FormulaId,
    pub kind: FormulaKind,
    pub config: FormulaConfig,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// Labels are compared case-insensitively; a clash is rejected up front.
    DuplicateLabel(String),
    UnknownFormula(FormulaId),
    /// Built-ins can be hidden, not renamed.
    BuiltinImmutable(FormulaId),
    /// Removing the last visible row would leave columns with nothing to
    /// select; refused.
    LastVisibleRow,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateLabel(label) => {
                write!(f, "average formula name already exists: {label}")
            }
            Self::UnknownFormula(id) => write!(f, "unknown formula id: {id}"),
            Self::BuiltinImmutable(id) => write!(f, "built-in formula cannot be renamed: {id}"),
            Self::LastVisibleRow => write!(f, "cannot remove the last visible formula"),
        }
    }
}

pub struct FormulaRegistry {
    rows: Vec<FormulaRow>,
    hidden: BTreeSet<FormulaId>,
    next_custom: u64,
}

impl Default for FormulaRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl FormulaRegistry {
    /// The built-in set: volume over everything (the scope default), and the
    /// two eight-period windows.
    pub fn with_builtins() -> Self {
        let builtin = |id: &str, base, periods| FormulaRow {
            id: FormulaId::from(id),
            kind: FormulaKind::Builtin,
            config: FormulaConfig {
                label: auto_name(base, periods, 0),
                base,
                periods,
                exclude: 0,
            },
        };
        FormulaRegistry {
            rows: vec![
                builtin("volume_all", AverageBase::Volume, Periods::All),
                builtin("volume_8", AverageBase::Volume, Periods::Recent(8)),
                builtin("simple_8", AverageBase::Simple, Periods::Recent(8)),
            ],
            hidden: BTreeSet::new(),
            next_custom: 0,
        }
    }

    /// Visible rows in display order.
    pub fn visible(&self) -> impl Iterator<Item = &FormulaRow> {
        self.rows.iter().filter(|row| !self.hidden.contains(&row.id))
    }

    pub fn visible_count(&self) -> usize {
        self.visible().count()
    }

    /// The scope's default formula: first visible row.
    pub fn default_id(&self) -> Option<&FormulaId> {
        self.visible().next().map(|row| &row.id)
    }

    /// Visible config lookup. Hidden built-ins do not resolve.
    pub fn get(&self, id: &FormulaId) -> Option<&FormulaConfig> {
        self.visible().find(|row| &row.id == id).map(|row| &row.config)
    }

    pub fn contains(&self, id: &FormulaId) -> bool {
        self.get(id).is_some()
    }

    /// Visible labels in order, as written to the selection file.
    pub fn labels(&self) -> Vec<String> {
        self.visible().map(|row| row.config.label.clone()).collect()
    }

    /// Resolve a persisted label back to a row; falls back to id match so
    /// older files that stored ids still load.
    pub fn find_by_label(&self, label: &str) -> Option<&FormulaRow> {
        self.visible()
            .find(|row| row.config.label == label || row.id.as_str() == label)
    }

    fn label_taken(&self, label: &str, except: Option<&FormulaId>) -> bool {
        let wanted = label.trim().to_lowercase();
        self.rows.iter().any(|row| {
            Some(&row.id) != except && row.config.label.trim().to_lowercase() == wanted
        })
    }

    /// Add a custom formula. An empty label gets the auto-generated name.
    pub fn add_custom(
        &mut self,
        label: &str,
        base: AverageBase,
        periods: Periods,
        exclude: u32,
    ) -> Result<FormulaId, RegistryError> {
        let label = {
            let t = label.trim();
            if t.is_empty() { auto_name(base, periods, exclude) } else { t.to_string() }
        };
        if self.label_taken(&label, None) {
            return Err(RegistryError::DuplicateLabel(label));
        }
        self.next_custom += 1;
        let id = FormulaId(format!("custom_{}", self.next_custom));
        self.rows.push(FormulaRow {
            id: id.clone(),
            kind: FormulaKind::Custom,
            config: FormulaConfig { label, base, periods, exclude },
        });
        Ok(id)
    }

    pub fn rename(&mut self, id: &FormulaId, new_label: &str) -> Result<(), RegistryError> {
        let trimmed = new_label.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        if self.label_taken(trimmed, Some(id)) {
            return Err(RegistryError::DuplicateLabel(trimmed.to_string()));
        }
        let row = self
            .rows
            .iter_mut()
            .find(|row| &row.id == id)
            .ok_or_else(|| RegistryError::UnknownFormula(id.clone()))?;
        if row.kind == FormulaKind::Builtin {
            return Err(RegistryError::BuiltinImmutable(id.clone()));
        }
        row.config.label = trimmed.to_string();
        Ok(())
    }

    /// Remove a custom row, or hide a built-in one. Refused when it would
    /// leave nothing visible.
    pub fn remove(&mut self, id: &FormulaId) -> Result<(), RegistryError> {
        let idx = self
            .rows
            .iter()
            .position(|row| &row.id == id)
            .ok_or_else(|| RegistryError::UnknownFormula(id.clone()))?;
        if self.visible_count() <= 1 && !self.hidden.contains(id) {
            return Err(RegistryError::LastVisibleRow);
        }
        match self.rows[idx].kind {
            FormulaKind::Custom => {
                self.rows.remove(idx);
            }
            FormulaKind::Builtin => {
                self.hidden.insert(id.clone());
            }
        }
        Ok(())
    }

    /// Restore a hidden built-in.
    pub fn unhide(&mut self, id: &FormulaId) {
        self.hidden.remove(id);
    }

    /// Custom rows in display order, for the per-scope registry snapshot.
    pub fn custom_rows(&self) -> impl Iterator<Item = &FormulaRow> {
        self.rows.iter().filter(|row| row.kind == FormulaKind::Custom)
    }

    /// Hidden built-in ids, for the per-scope registry snapshot.
    pub fn hidden_ids(&self) -> impl Iterator<Item = &FormulaId> {
        self.hidden.iter()
    }

    /// Reinstate a saved custom formula under its stored id. Entries whose id
    /// or label clashes with an existing row are skipped; the custom counter
    /// advances past the restored id so later additions never collide.
    pub fn restore_custom(&mut self, id: FormulaId, config: FormulaConfig) {
        if self.rows.iter().any(|row| row.id == id) || self.label_taken(&config.label, None) {
            return;
        }
        if let Some(n) = id.as_str().strip_prefix("custom_").and_then(|s| s.parse::<u64>().ok()) {
            self.next_custom = self.next_custom.max(n);
        }
        self.rows.push(FormulaRow { id, kind: FormulaKind::Custom, config });
    }

    /// Hide a built-in from a saved hide list. Unknown or custom ids are
    /// ignored, and the last visible row stays visible, mirroring `remove`.
    pub fn hide(&mut self, id: &FormulaId) {
        let is_builtin = self
            .rows
            .iter()
            .any(|row| &row.id == id && row.kind == FormulaKind::Builtin);
        if !is_builtin || self.hidden.contains(id) || self.visible_count() <= 1 {
            return;
        }
        self.hidden.insert(id.clone());
    }
}
