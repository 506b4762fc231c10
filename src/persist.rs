//! Durable storage of the selection state: a normalized JSON document per
//! (project, reserving class, triangle, origin/dev length) scope, written
//! through an abstract host surface so the engine never touches the
//! filesystem directly. Absent files are a normal "not yet saved" state;
//! malformed files are applied as far as they fit and the rest ignored.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::average::FormulaConfig;
use crate::library::FormulaRegistry;
use crate::ratio::{cell_ratio, ratio_header_labels};
use crate::selection::SelectionStore;
use crate::triangle::Triangle;
use crate::types::{CellKey, CellState, FormulaId};

// ── Scope key ────────────────────────────────────────────────────────────────

/// Deterministic identity of one selection file. Re-opening the same triangle
/// with the same shape resolves to the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeKey {
    pub root: PathBuf,
    pub project: String,
    pub class_path: String,
    pub triangle_name: String,
    pub origin_len: u32,
    pub dev_len: u32,
}

/// Strip filesystem-hostile characters and collapse runs of whitespace, the
/// way the host app names its method files.
fn sanitize(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let mut last_underscore = false;
    let mut last_space = false;
    for ch in part.trim().chars() {
        if matches!(ch, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
            if !last_underscore {
                out.push('_');
                last_underscore = true;
            }
            last_space = false;
        } else if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
            last_underscore = false;
        } else {
            out.push(ch);
            last_underscore = false;
            last_space = false;
        }
    }
    out
}

impl ScopeKey {
    /// `DFM@<triangle>@<class>@<origin>@<dev>.json`, sanitized.
    pub fn file_name(&self) -> String {
        let parts = [
            self.triangle_name.as_str(),
            self.class_path.as_str(),
            &self.origin_len.to_string(),
            &self.dev_len.to_string(),
        ];
        let joined = parts
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("@");
        let safe = sanitize(&joined);
        if safe.is_empty() {
            "DFM@selection.json".to_string()
        } else {
            format!("DFM@{safe}.json")
        }
    }

    /// `<root>/data/<project>/`.
    pub fn dir(&self) -> PathBuf {
        let project = sanitize(&self.project);
        let project = if project.is_empty() { "UnknownProject".to_string() } else { project };
        self.root.join("data").join(project)
    }

    pub fn path(&self) -> PathBuf {
        self.dir().join(self.file_name())
    }
}

// ── Host surface ─────────────────────────────────────────────────────────────

pub struct SaveRequest {
    /// None means "ask the host where" (save-as); the host may cancel.
    pub path: Option<PathBuf>,
    pub data: Value,
    pub suggested_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { path: PathBuf },
    Canceled,
    /// The live in-memory state is untouched by a failed write.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Missing,
    Found { data: Value },
}

/// The host's save/load surface. The engine hands over JSON values and paths;
/// dialogs, permissions and the actual filesystem belong to the host.
pub trait HostIo {
    fn save_json(&mut self, req: SaveRequest) -> SaveOutcome;
    fn read_json(&self, path: &Path) -> ReadOutcome;
}

/// Direct-to-disk host for the CLI: no dialogs, so a save-as request without
/// a path fails rather than prompting.
#[derive(Debug, Default)]
pub struct DiskHost;

impl HostIo for DiskHost {
    fn save_json(&mut self, req: SaveRequest) -> SaveOutcome {
        let Some(path) = req.path else {
            return SaveOutcome::Failed { error: "no target path (save dialog unavailable)".into() };
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                return SaveOutcome::Failed { error: e.to_string() };
            }
        }
        let text = match serde_json::to_string_pretty(&req.data) {
            Ok(t) => t,
            Err(e) => return SaveOutcome::Failed { error: e.to_string() },
        };
        match fs::write(&path, text) {
            Ok(()) => SaveOutcome::Saved { path },
            Err(e) => SaveOutcome::Failed { error: e.to_string() },
        }
    }

    fn read_json(&self, path: &Path) -> ReadOutcome {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return ReadOutcome::Missing,
            Err(_) => return ReadOutcome::Missing,
        };
        match serde_json::from_str(&text) {
            Ok(data) => ReadOutcome::Found { data },
            // Unparseable file: degrade to the not-yet-saved state.
            Err(_) => ReadOutcome::Missing,
        }
    }
}

// ── Document shape ───────────────────────────────────────────────────────────

/// On-disk form. `pattern` is a dense origins × ratio-columns grid of cell
/// states; `average index` is a one-hot ratio-columns × formulas matrix over
/// the labels in `average formula`. The scope's registry customisations ride
/// along so a fresh session can rebuild custom formulas before resolving the
/// matrix; both sections are absent from older files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionDoc {
    pub pattern: Vec<Vec<u8>>,
    #[serde(rename = "average formula")]
    pub formulas: Vec<String>,
    #[serde(rename = "average index")]
    pub matrix: Vec<Vec<u8>>,
    #[serde(rename = "custom formulas", default, skip_serializing_if = "Vec::is_empty")]
    pub customs: Vec<CustomFormulaEntry>,
    #[serde(rename = "hidden formulas", default, skip_serializing_if = "Vec::is_empty")]
    pub hidden: Vec<FormulaId>,
}

/// One saved custom formula: id plus the full config, enough to rebuild the
/// registry row in a session that never saw the formula added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFormulaEntry {
    pub id: FormulaId,
    pub config: FormulaConfig,
}

/// Build the normalized document from live state. Strikes on cells that are
/// no longer computable are recorded as no-data, not as strikes.
pub fn build_doc(
    triangle: &Triangle,
    store: &SelectionStore,
    registry: &FormulaRegistry,
) -> SelectionDoc {
    let devs = triangle.effective_dev_labels();
    let col_count = ratio_header_labels(devs).len();

    let mut pattern = Vec::with_capacity(triangle.row_count());
    for r in 0..triangle.row_count() {
        let mut row = Vec::with_capacity(col_count);
        for c in 0..col_count {
            let state = if triangle.is_ultimate_col(c) || cell_ratio(triangle, r, c).is_none() {
                CellState::NotApplicable
            } else if store.is_struck(CellKey::new(r, c)) {
                CellState::Struck
            } else {
                CellState::Included
            };
            row.push(state.to_code());
        }
        pattern.push(row);
    }

    let formulas = registry.labels();
    let visible_ids: Vec<&FormulaId> = registry.visible().map(|row| &row.id).collect();
    let mut matrix = Vec::with_capacity(col_count);
    for c in 0..col_count {
        let mut row = vec![0u8; formulas.len()];
        if let Some(id) = store.selected_formula_id(c) {
            if let Some(idx) = visible_ids.iter().position(|v| *v == id) {
                row[idx] = 1;
            }
        }
        matrix.push(row);
    }

    let customs = registry
        .custom_rows()
        .map(|row| CustomFormulaEntry { id: row.id.clone(), config: row.config.clone() })
        .collect();
    let hidden = registry.hidden_ids().cloned().collect();

    SelectionDoc { pattern, formulas, matrix, customs, hidden }
}

// ── Load path ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No file for this scope yet: state reset to defaults. Not an error.
    Absent,
    /// A saved pattern was applied (possibly clipped to the current shape).
    Applied,
    /// A file exists but nothing in it fit the current triangle.
    Unusable,
}

fn pattern_rows(value: &Value) -> Option<&Vec<Value>> {
    value.as_array()
}

/// Apply a saved strike pattern. Rows and columns beyond the current
/// triangle's shape are ignored; the synthetic ultimate column is never a
/// strike target regardless of what the file says.
fn apply_pattern(pattern: &Value, triangle: &Triangle, store: &mut SelectionStore) -> bool {
    let Some(rows) = pattern_rows(pattern) else {
        return false;
    };
    let devs = triangle.effective_dev_labels();
    let row_count = rows.len().min(triangle.row_count());
    let col_count = devs.len().saturating_sub(1);
    if row_count == 0 || col_count == 0 {
        return false;
    }

    let mut strikes = BTreeSet::new();
    for (r, row) in rows.iter().take(row_count).enumerate() {
        let Some(cells) = row.as_array() else {
            continue;
        };
        for (c, cell) in cells.iter().take(col_count).enumerate() {
            let code = cell.as_u64().and_then(|v| u8::try_from(v).ok()).unwrap_or(u8::MAX);
            if CellState::from_code(code) == CellState::Struck {
                strikes.insert(CellKey::new(r, c));
            }
        }
    }
    store.replace_strikes(strikes);
    true
}

/// Resolve the one-hot formula matrix back onto the registry by label (id as
/// fallback for older files). Unknown labels are skipped; those columns will
/// lazily pick up the scope default.
fn apply_formula_matrix(
    formulas: &[Value],
    matrix: &[Value],
    registry: &FormulaRegistry,
    store: &mut SelectionStore,
) {
    let labels: Vec<String> = formulas
        .iter()
        .map(|v| v.as_str().map(str::to_string).unwrap_or_default())
        .collect();

    let mut selected = BTreeMap::new();
    for (c, row) in matrix.iter().enumerate() {
        let Some(cells) = row.as_array() else {
            continue;
        };
        let Some(idx) = cells.iter().position(|v| v.as_u64() == Some(1)) else {
            continue;
        };
        let Some(label) = labels.get(idx).filter(|l| !l.is_empty()) else {
            continue;
        };
        if let Some(row) = registry.find_by_label(label) {
            selected.insert(c, row.id.clone());
        }
    }
    store.replace_selection(selected);
}

/// Older files carried a `selected` field instead of the matrix: either
/// `[[col, id], ...]` pairs or a flat per-column id list.
fn apply_selected_field(
    selected: &[Value],
    col_count: usize,
    registry: &FormulaRegistry,
    store: &mut SelectionStore,
) {
    let mut map = BTreeMap::new();
    if selected.first().is_some_and(Value::is_array) {
        for entry in selected {
            let Some(pair) = entry.as_array() else {
                continue;
            };
            let (Some(col), Some(id)) = (
                pair.first().and_then(Value::as_u64),
                pair.get(1).and_then(Value::as_str),
            ) else {
                continue;
            };
            if !id.is_empty() && registry.contains(&FormulaId::from(id)) {
                map.insert(col as usize, FormulaId::from(id));
            }
        }
    } else {
        for (c, entry) in selected.iter().take(col_count).enumerate() {
            let Some(id) = entry.as_str().filter(|s| !s.is_empty()) else {
                continue;
            };
            if registry.contains(&FormulaId::from(id)) {
                map.insert(c, FormulaId::from(id));
            }
        }
    }
    store.replace_selection(map);
}

/// Rebuild the scope's registry customisations saved alongside the pattern.
/// Entries that fail to decode or clash with existing rows are skipped.
fn apply_registry(data: &Value, registry: &mut FormulaRegistry) {
    let Some(obj) = data.as_object() else {
        return;
    };
    if let Some(entries) = obj.get("custom formulas").and_then(Value::as_array) {
        for entry in entries {
            if let Ok(saved) = serde_json::from_value::<CustomFormulaEntry>(entry.clone()) {
                registry.restore_custom(saved.id, saved.config);
            }
        }
    }
    if let Some(ids) = obj.get("hidden formulas").and_then(Value::as_array) {
        for id in ids {
            if let Some(id) = id.as_str() {
                registry.hide(&FormulaId::from(id));
            }
        }
    }
}

/// Apply a loaded document to the registry and store. Accepts the normalized
/// object form, the legacy bare-array form (pattern only), and anything in
/// between; every decode path degrades to the nearest safe default instead of
/// erroring. Registry customisations are restored first so the formula matrix
/// can resolve labels that only exist in this scope.
pub fn apply_document(
    data: &Value,
    triangle: &Triangle,
    registry: &mut FormulaRegistry,
    store: &mut SelectionStore,
) -> LoadOutcome {
    apply_registry(data, registry);

    let pattern = if data.is_array() { data } else { &data["pattern"] };
    let applied = apply_pattern(pattern, triangle, store);

    if let Some(obj) = data.as_object() {
        let formulas = obj.get("average formula").and_then(Value::as_array);
        let matrix = obj.get("average index").and_then(Value::as_array);
        match (formulas, matrix) {
            (Some(f), Some(m)) => apply_formula_matrix(f, m, registry, store),
            _ => {
                if let Some(selected) = obj.get("selected").and_then(Value::as_array) {
                    let col_count = ratio_header_labels(triangle.effective_dev_labels()).len();
                    apply_selected_field(selected, col_count, registry, store);
                }
            }
        }
    }

    if applied { LoadOutcome::Applied } else { LoadOutcome::Unusable }
}

// ── Gateway ──────────────────────────────────────────────────────────────────

/// Save the selection through the host. `save_as` routes through the host's
/// dialog instead of the scope's canonical path.
pub fn save(
    host: &mut dyn HostIo,
    scope: &ScopeKey,
    triangle: &Triangle,
    store: &SelectionStore,
    registry: &FormulaRegistry,
    save_as: bool,
) -> SaveOutcome {
    let doc = build_doc(triangle, store, registry);
    let data = match serde_json::to_value(&doc) {
        Ok(v) => v,
        Err(e) => return SaveOutcome::Failed { error: e.to_string() },
    };
    host.save_json(SaveRequest {
        path: if save_as { None } else { Some(scope.path()) },
        data,
        suggested_name: scope.file_name(),
    })
}

/// Load the selection for a scope. An absent file resets the store to
/// defaults and reports `Absent`, which callers surface as a notice, not an
/// error.
pub fn load(
    host: &dyn HostIo,
    scope: &ScopeKey,
    triangle: &Triangle,
    registry: &mut FormulaRegistry,
    store: &mut SelectionStore,
) -> LoadOutcome {
    match host.read_json(&scope.path()) {
        ReadOutcome::Missing => {
            store.reset();
            LoadOutcome::Absent
        }
        ReadOutcome::Found { data } => apply_document(&data, triangle, registry, store),
    }
}

// ── Debounced loads ──────────────────────────────────────────────────────────

/// Coalesces the burst of load requests that follows a run of UI input
/// changes (project, triangle, origin length in quick succession) into one
/// read, and drops responses whose scope is no longer active.
#[derive(Debug)]
pub struct LoadScheduler {
    delay_ms: u64,
    pending: Option<(u64, ScopeKey)>,
}

impl LoadScheduler {
    pub fn new(delay_ms: u64) -> Self {
        LoadScheduler { delay_ms, pending: None }
    }

    /// Schedule a load; a newer request replaces any pending one.
    pub fn request(&mut self, now_ms: u64, scope: ScopeKey) {
        self.pending = Some((now_ms + self.delay_ms, scope));
    }

    /// The scope to load now, if the quiet period has elapsed and the request
    /// still matches the active scope. Stale requests are silently dropped.
    pub fn due(&mut self, now_ms: u64, active: &ScopeKey) -> Option<ScopeKey> {
        if !matches!(&self.pending, Some((at, _)) if *at <= now_ms) {
            return None;
        }
        let (_, scope) = self.pending.take()?;
        (scope == *active).then_some(scope)
    }
}
