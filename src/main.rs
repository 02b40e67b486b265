//! amr-analytics entry point: loads a school and prints per-meter figures.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use chrono::NaiveDate;
use clap::Parser;

use amr_analytics::amr::generation::GenerationModel;
use amr_analytics::amr::meter::Meter;
use amr_analytics::config::SchoolConfig;
use amr_analytics::io::export::{daily_rows, export_csv};
use amr_analytics::io::readings::{load_readings, load_yields};
use amr_analytics::school::{MeterSummary, SchoolModel};
use amr_analytics::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// School configuration (TOML).
    #[arg(long)]
    school: PathBuf,
    /// Half-hourly readings (CSV).
    #[arg(long)]
    readings: PathBuf,
    /// Per-date solar yields in kW per kWp (CSV).
    #[arg(long)]
    solar_yields: Option<PathBuf>,
    /// Report a single meter, aggregate or sub-meter by id.
    #[arg(long)]
    meter: Option<String>,
    /// First date (YYYY-MM-DD); defaults to each meter's first reading.
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last date (YYYY-MM-DD); defaults to each meter's last reading.
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Print the monthly bill breakdown.
    #[arg(long, default_value_t = false)]
    monthly: bool,
    /// Write one row per day for the selected meter (CSV).
    #[arg(long, requires = "meter")]
    export: Option<PathBuf>,
}

fn report(meter: &Meter, cli: &Cli) -> anyhow::Result<()> {
    let (Some(start), Some(end)) = (
        cli.from.or_else(|| meter.start_date()),
        cli.to.or_else(|| meter.end_date()),
    ) else {
        println!("--- {} ({}) ---\nNo readings\n", meter.name(), meter.id());
        return Ok(());
    };

    let summary = MeterSummary::for_meter(meter, start, end)?;
    println!("{summary}");

    if cli.monthly {
        match meter.monthly_bills(start, end) {
            Ok(bills) => {
                for bill in &bills {
                    println!("{bill}");
                }
            }
            Err(e) if e.is_recoverable() => println!("Monthly bills unavailable: {e}\n"),
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(path) = &cli.export {
        let rows = daily_rows(meter, start, end)?;
        export_csv(&rows, path).with_context(|| format!("failed to write {}", path.display()))?;
        eprintln!("Daily rows written to {}", path.display());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    if let (Some(from), Some(to)) = (cli.from, cli.to) {
        if from > to {
            bail!("--from {from} is after --to {to}");
        }
    }

    let config = SchoolConfig::from_toml_file(&cli.school)?;
    let readings = load_readings(&cli.readings)?;
    let yields = cli
        .solar_yields
        .as_deref()
        .map(|path| load_yields(path).map(|model| Arc::new(model) as Arc<dyn GenerationModel>))
        .transpose()?;

    let school = SchoolModel::build(&config, readings, yields)?;
    println!("=== {} ===\n", school.name);

    match &cli.meter {
        Some(id) => {
            let meter = school.find(id).ok_or_else(|| anyhow!("unknown meter \"{id}\""))?;
            report(meter, &cli)?;
        }
        None => {
            for meter in school.meters().chain(school.aggregates()) {
                report(meter, &cli)?;
            }
        }
    }
    Ok(())
}
