use std::fs;
use std::path::PathBuf;
use std::process::exit;

use dfm::average::{compute_average, excluded_set_for_column, parse_exclude, parse_periods, AverageBase};
use dfm::library::FormulaRegistry;
use dfm::persist::{self, DiskHost, LoadOutcome, SaveOutcome, ScopeKey};
use dfm::projection::project;
use dfm::ratio::{cell_ratio, format_ratio, ratio_header_labels, round_ratio};
use dfm::selection::SelectionStore;
use dfm::triangle::Triangle;
use dfm::types::{CellKey, Direction, FormulaId};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut input_path: Option<String> = None;
    let mut root = ".".to_string();
    let mut project = String::new();
    let mut class_path = String::new();
    let mut triangle_name = String::new();
    let mut do_load = false;
    let mut do_save = false;
    let mut quiet = false;
    let mut strikes: Vec<String> = Vec::new();
    let mut selects: Vec<String> = Vec::new();
    let mut formulas: Vec<String> = Vec::new();
    let mut exclude_dir: Option<Direction> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--input" => {
                i += 1;
                input_path = Some(args[i].clone());
            }
            "--root" => {
                i += 1;
                root = args[i].clone();
            }
            "--project" => {
                i += 1;
                project = args[i].clone();
            }
            "--class" => {
                i += 1;
                class_path = args[i].clone();
            }
            "--triangle" => {
                i += 1;
                triangle_name = args[i].clone();
            }
            "--strike" => {
                i += 1;
                strikes.push(args[i].clone());
            }
            "--select" => {
                i += 1;
                selects.push(args[i].clone());
            }
            "--formula" => {
                i += 1;
                formulas.push(args[i].clone());
            }
            "--exclude-high" => exclude_dir = Some(Direction::High),
            "--exclude-low" => exclude_dir = Some(Direction::Low),
            "--load" => do_load = true,
            "--save" => do_save = true,
            "--quiet" => quiet = true,
            _ => {}
        }
        i += 1;
    }

    let Some(input_path) = input_path else {
        eprintln!("usage: dfm --input <triangle.json> [--root DIR --project P --class C --triangle T]");
        eprintln!("           [--formula base:periods:exclude[:label]] [--select col=id] [--strike r,c]");
        eprintln!("           [--exclude-high | --exclude-low] [--load] [--save] [--quiet]");
        exit(1);
    };

    let text = fs::read_to_string(&input_path).unwrap_or_else(|e| {
        eprintln!("failed to read {input_path}: {e}");
        exit(1);
    });
    let triangle: Triangle = serde_json::from_str(&text).unwrap_or_else(|e| {
        eprintln!("failed to parse {input_path}: {e}");
        exit(1);
    });

    let mut registry = FormulaRegistry::with_builtins();
    for raw in &formulas {
        let mut parts = raw.splitn(4, ':');
        let base = match parts.next().unwrap_or("") {
            "volume" => AverageBase::Volume,
            "simple" => AverageBase::Simple,
            other => {
                eprintln!("--formula base must be volume or simple, got {other:?}");
                exit(1);
            }
        };
        let periods = parse_periods(parts.next().unwrap_or(""));
        let exclude = parse_exclude(parts.next().unwrap_or(""));
        let label = parts.next().unwrap_or("");
        match registry.add_custom(label, base, periods, exclude) {
            Ok(id) => {
                if !quiet {
                    println!("Added formula {id}");
                }
            }
            Err(e) => {
                eprintln!("--formula {raw}: {e}");
                exit(1);
            }
        }
    }

    let scope = ScopeKey {
        root: PathBuf::from(&root),
        project,
        class_path,
        triangle_name,
        origin_len: triangle.row_count() as u32,
        dev_len: triangle.effective_dev_labels().len() as u32,
    };

    let mut store = SelectionStore::new();

    if do_load {
        match persist::load(&DiskHost, &scope, &triangle, &mut registry, &mut store) {
            LoadOutcome::Absent => {
                if !quiet {
                    println!("No saved selection for this scope; using defaults.");
                }
            }
            LoadOutcome::Applied => {
                if !quiet {
                    println!("Loaded selection from {}", scope.path().display());
                }
            }
            LoadOutcome::Unusable => {
                eprintln!("Warning: saved selection did not fit this triangle; ignored.");
            }
        }
    }

    for raw in &strikes {
        let Some(key) = CellKey::parse(raw) else {
            eprintln!("--strike expects r,c (got {raw:?})");
            exit(1);
        };
        if !store.toggle_strike(&triangle, key.row, key.col) {
            eprintln!("Warning: cell {key} is not strikeable; ignored.");
        }
    }

    for raw in &selects {
        let Some((col, id)) = raw.split_once('=') else {
            eprintln!("--select expects col=formula_id (got {raw:?})");
            exit(1);
        };
        let col: usize = col.trim().parse().unwrap_or_else(|_| {
            eprintln!("--select column must be an integer (got {raw:?})");
            exit(1);
        });
        if !store.set_column_formula(&registry, col, FormulaId::from(id.trim())) {
            eprintln!("Warning: unknown formula id {id:?}; selection for column {col} unchanged.");
        }
    }

    if let Some(direction) = exclude_dir {
        let cols: Vec<usize> = match triangle.last_real_ratio_col() {
            Some(last) => (0..=last).collect(),
            None => Vec::new(),
        };
        let struck = store.exclude_extreme(&triangle, &cols, direction);
        if !quiet {
            for key in &struck {
                println!("Excluded extreme at {key}");
            }
        }
    }

    store.fill_default_selection(&registry, triangle.ratio_col_count());

    if !quiet {
        print_tables(&triangle, &store, &registry);
    }

    if do_save {
        match persist::save(&mut DiskHost, &scope, &triangle, &store, &registry, false) {
            SaveOutcome::Saved { path } => {
                if !quiet {
                    println!("\nSaved selection to {}", path.display());
                }
            }
            SaveOutcome::Canceled => eprintln!("Save canceled."),
            SaveOutcome::Failed { error } => {
                eprintln!("Save failed: {error}");
                exit(1);
            }
        }
    }
}

fn fmt_cell(value: Option<f64>) -> String {
    match value.and_then(|v| round_ratio(v, 6)) {
        Some(v) => format_ratio(v, 4),
        None => String::new(),
    }
}

fn print_tables(triangle: &Triangle, store: &SelectionStore, registry: &FormulaRegistry) {
    let headers = ratio_header_labels(triangle.effective_dev_labels());

    // ── Ratio matrix ─────────────────────────────────────────────────────────
    println!("\n=== Link ratios ===");
    print!("{:>10}", "Origin");
    for h in &headers {
        print!(" | {h:>10}");
    }
    println!();
    println!("{}", "-".repeat(10 + headers.len() * 13));

    for r in 0..triangle.row_count() {
        print!("{:>10}", triangle.origin_labels[r]);
        for c in 0..headers.len() {
            let shown = if triangle.is_ultimate_col(c) {
                String::new()
            } else {
                let text = fmt_cell(cell_ratio(triangle, r, c));
                if store.is_struck(CellKey::new(r, c)) {
                    format!("({text})")
                } else {
                    text
                }
            };
            print!(" | {shown:>10}");
        }
        println!();
    }

    // ── Formula summary rows ─────────────────────────────────────────────────
    println!("\n=== Averages ===");
    for row in registry.visible() {
        print!("{:>24}", row.config.label);
        for c in 0..headers.len() {
            let shown = if triangle.is_ultimate_col(c) {
                String::new()
            } else {
                let excluded = excluded_set_for_column(
                    triangle,
                    c,
                    &row.config,
                    store.strikes(),
                );
                let out = compute_average(triangle, c, &excluded, &row.config);
                fmt_cell(out.summary_value())
            };
            print!(" | {shown:>10}");
        }
        println!();
    }

    // ── Selected / cumulative ────────────────────────────────────────────────
    let (factors, ultimates) = project(triangle, store, registry);
    let selected = store.selected_ratio_values(triangle, registry);

    print!("{:>24}", "Selected");
    for &v in &selected {
        print!(" | {:>10}", fmt_cell(Some(v)));
    }
    println!();

    print!("{:>24}", "Cumulative");
    for &f in &factors {
        print!(" | {:>10}", fmt_cell(f));
    }
    println!();

    // ── Ultimates ────────────────────────────────────────────────────────────
    println!("\n=== Ultimates ===");
    println!("{:>10} | {:>14} | {:>14}", "Origin", "Latest", "Ultimate");
    for r in 0..triangle.row_count() {
        let latest = triangle.latest_diagonal(r);
        let latest_s = latest.map(|d| format!("{:.2}", d.value)).unwrap_or_default();
        let ult_s = ultimates[r].map(|u| format!("{u:.2}")).unwrap_or_default();
        println!("{:>10} | {:>14} | {:>14}", triangle.origin_labels[r], latest_s, ult_s);
    }
}
