// Entry point and interactive CLI flow.
//
// - Option [1] loads the ward, feature and rainfall datasets from the data
//   directory, printing load diagnostics.
// - Option [2] runs the scoring engine, exports the ward scores, hotspot
//   grid, rainfall series and a JSON run summary, and previews each table.
// - After exporting, the user can go back to the menu or exit.
use once_cell::sync::Lazy;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing_subscriber::EnvFilter;

use ward_resilience::config::EngineConfig;
use ward_resilience::pipeline::{self, Inputs};
use ward_resilience::{loader, output, reports, util};

const DATA_DIR_ENV: &str = "WARD_RESILIENCE_DATA";

// Datasets are loaded once and can be scored any number of times.
static APP_STATE: Lazy<Mutex<AppState>> = Lazy::new(|| {
    Mutex::new(AppState {
        inputs: None,
        config: EngineConfig::default(),
    })
});

struct AppState {
    inputs: Option<Inputs>,
    config: EngineConfig,
}

fn state() -> MutexGuard<'static, AppState> {
    // A panic while holding the lock leaves the state itself intact.
    APP_STATE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn data_dir() -> PathBuf {
    std::env::var(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

/// Read a single line of input after printing the common "Enter choice:" prompt.
fn read_choice() -> String {
    print!("Enter choice: ");
    let _ = io::stdout().flush();
    let mut buf = String::new();
    io::stdin().read_line(&mut buf).ok();
    buf.trim().to_string()
}

/// Returns `true` if the user chose `Y`, `false` if they chose `N`.
fn prompt_back_to_menu() -> bool {
    loop {
        print!("Back to Menu (Y/N): ");
        let _ = io::stdout().flush();
        let mut buf = String::new();
        io::stdin().read_line(&mut buf).ok();
        match buf.trim().to_uppercase().as_str() {
            "Y" => return true,
            "N" => return false,
            _ => println!("Invalid choice. Please enter Y or N."),
        }
    }
}

/// Handle option [1]: load every dataset in the data directory.
fn handle_load() {
    let dir = data_dir();
    match loader::load_datasets(&dir) {
        Ok((inputs, rain_report)) => {
            println!(
                "Loaded {} wards and {} feature layers from {}",
                util::format_int(inputs.wards.wards.len()),
                inputs.layers.len(),
                dir.display()
            );
            for layer in &inputs.layers {
                println!(
                    "  {}: {} features",
                    layer.kind.label(),
                    util::format_int(layer.geometries.len())
                );
            }
            println!(
                "Rainfall: {} rows read, {} kept",
                util::format_int(rain_report.total_rows),
                util::format_int(rain_report.loaded_rows)
            );
            if rain_report.parse_errors > 0 {
                println!(
                    "Note: {} rainfall rows skipped due to parse/validation errors.",
                    util::format_int(rain_report.parse_errors)
                );
            }
            println!();
            state().inputs = Some(inputs);
        }
        Err(e) => {
            eprintln!("Failed to load datasets: {}\n", e);
        }
    }
}

fn export<F>(file: &str, write: F)
where
    F: FnOnce(&Path) -> ward_resilience::Result<()>,
{
    if let Err(e) = write(Path::new(file)) {
        eprintln!("Write error ({}): {}", file, e);
    }
}

/// Handle option [2]: score the loaded datasets and export every table.
fn handle_generate() {
    let (inputs, config) = {
        let s = state();
        (s.inputs.clone(), s.config.clone())
    };
    let Some(inputs) = inputs else {
        println!("Error: No data loaded. Please load the datasets first (option 1).\n");
        return;
    };

    println!("Scoring wards...");
    let out = match pipeline::run(&inputs, &config) {
        Ok(out) => out,
        Err(e) => {
            eprintln!("Run aborted: {}\n", e);
            return;
        }
    };
    println!("Outputs saved to individual files...\n");

    let wards = reports::ranked_ward_table(&out.scores);
    let file1 = "ward_resilience_scores.csv";
    export(file1, |p| output::write_csv(p, &reports::ward_table(&out.scores)));
    output::preview_table(
        "Ward Flood Resilience Index",
        Some("0 = most resilient, 100 = most vulnerable; most vulnerable first"),
        &wards,
        5,
    );
    println!("(Full table exported to {})\n", file1);

    let cells = reports::hotspot_table(&out.hotspots);
    let file2 = "ward_hotspot_grid.csv";
    export(file2, |p| output::write_csv(p, &cells));
    export("ward_hotspot_grid.geojson", |p| {
        output::write_hotspots_geojson(p, &out.hotspots, &config.target_crs)
    });
    export("ward_resilience.geojson", |p| {
        output::write_wards_geojson(p, &out.wards, &out.scores, &config.target_crs)
    });
    let grid_note = format!("{} m cells, clipped to ward boundaries", config.grid.cell_size_m);
    output::preview_table("Hotspot Grid", Some(grid_note.as_str()), &cells, 3);
    println!("(Full table exported to {})\n", file2);

    let rain = reports::rainfall_table(&out.rainfall);
    let file3 = "rainfall_annual_series.csv";
    export(file3, |p| output::write_csv(p, &rain));
    output::preview_table("Annual Rainfall", Some("deviation from the long-run mean"), &rain, 3);
    println!("(Full table exported to {})\n", file3);

    let summary = reports::generate_summary(&out);
    export("summary.json", |p| output::write_json(p, &summary));
    export("run_report.json", |p| output::write_json(p, &out.report));
    println!("Summary Stats (summary.json):");
    println!(
        "{{\"status\": {:?}, \"wards_scored\": {}, \"mean_score\": {}, \"warnings\": {}}}\n",
        summary.status,
        util::format_int(summary.wards_scored),
        util::format_number(summary.mean_score, 2),
        summary.warnings
    );
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ward_resilience=info")),
        )
        .init();

    match EngineConfig::load() {
        Ok(config) => state().config = config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    }

    loop {
        println!("Ward Flood Resilience:");
        println!("[1] Load the datasets");
        println!("[2] Score wards and export\n");
        match read_choice().as_str() {
            "1" => {
                handle_load();
            }
            "2" => {
                println!();
                handle_generate();
                if !prompt_back_to_menu() {
                    println!("Exiting the program.");
                    break;
                }
            }
            _ => {
                println!("Invalid choice. Please enter 1 or 2.\n");
            }
        }
    }
}
