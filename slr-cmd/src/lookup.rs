//! `level` and `station`: single table lookups printed to stdout.

use anyhow::Context;
use log::info;
use slr_tables::{Ar6Table, CodecTable, Quantile, ScenarioCode, ScenarioKey};
use std::path::Path;

use crate::ScenarioArgs;

pub fn scenario_key(args: &ScenarioArgs) -> anyhow::Result<ScenarioKey> {
    let scenario: ScenarioCode = args.scenario.parse()?;
    let quantile: Quantile = args.quantile.parse()?;
    Ok(ScenarioKey::new(scenario, args.year, quantile))
}

pub fn load_ar6(path: &Path) -> anyhow::Result<Ar6Table> {
    Ar6Table::from_path(path).with_context(|| format!("loading AR6 table {}", path.display()))
}

pub fn load_codec(path: &Path) -> anyhow::Result<CodecTable> {
    CodecTable::from_path(path).with_context(|| format!("loading CODEC table {}", path.display()))
}

/// Print the AR6 level and base level (level + offset) for the selected key.
pub fn run_level(args: &ScenarioArgs, list: bool) -> anyhow::Result<()> {
    let table = load_ar6(&args.ar6)?;
    if list {
        let years: Vec<String> = table.years().iter().map(|y| y.to_string()).collect();
        println!("Years: {}", years.join(", "));
        for (scenario, quantile) in table.scenario_quantiles() {
            println!("{} ({}) {}", scenario.label(), scenario.code(), quantile.label());
        }
        return Ok(());
    }

    let key = scenario_key(args)?;
    let level = table.lookup(&key)?;
    info!("AR6 lookup {} in {} -> {:.3} m", key, table.source(), level);
    println!(
        "{} {} {}: AR6 {:.3} m, offset {:.3} m, base {:.3} m",
        key.scenario.label(),
        key.year,
        key.quantile.label(),
        level,
        args.offset,
        level + args.offset
    );
    Ok(())
}

/// Print the selected station as JSON.
pub fn run_station(
    codec: &Path,
    target: Option<(f64, f64)>,
    station_id: Option<&str>,
    return_period: Option<u32>,
    list: bool,
) -> anyhow::Result<()> {
    let table = load_codec(codec)?;
    if list {
        let periods: Vec<String> = table.return_periods().iter().map(|p| p.to_string()).collect();
        println!("Return periods: {}", periods.join(", "));
        println!("Stations: {}", table.station_ids().join(", "));
        return Ok(());
    }
    let found = table.lookup(target, return_period, station_id)?;
    println!("{}", serde_json::to_string_pretty(&found)?);
    Ok(())
}
