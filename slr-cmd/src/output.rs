//! Files written by the commands: per-feature CSV, text report, JSON.

use anyhow::Context;
use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use slr_exposure::{write_report, ExposureSummary, FeatureExposure};
use slr_utils::text::has_formula_prefix;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Text for one CSV cell. Strings starting with a formula character get a
/// leading apostrophe.
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) if has_formula_prefix(s) => format!("'{}", s),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Header for a source attribute. Names taken by `fid`, a computed field or
/// an earlier attribute get a `src_` prefix until unique.
fn attribute_header(key: &str, taken: &[String]) -> String {
    let mut name = key.to_string();
    while taken.iter().any(|t| *t == name) {
        name = format!("src_{}", name);
    }
    name
}

/// Write one row per feature: `fid`, the source attributes (union of keys in
/// first-seen order), then the computed exposure fields.
pub fn write_feature_csv<W: Write>(out: W, features: &[FeatureExposure]) -> anyhow::Result<()> {
    let mut attribute_keys: Vec<&str> = Vec::new();
    for f in features {
        for key in f.attributes.keys() {
            if !attribute_keys.contains(&key.as_str()) {
                attribute_keys.push(key);
            }
        }
    }
    let computed: Vec<&str> = features
        .iter()
        .max_by_key(|f| f.population.is_some())
        .map(|f| f.output_fields().into_iter().map(|(k, _)| k).collect())
        .unwrap_or_default();

    let mut taken: Vec<String> = std::iter::once("fid")
        .chain(computed.iter().copied())
        .map(str::to_string)
        .collect();
    let mut header = vec!["fid".to_string()];
    for key in &attribute_keys {
        let name = attribute_header(key, &taken);
        taken.push(name.clone());
        header.push(name);
    }
    header.extend(computed.iter().map(|c| c.to_string()));

    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(&header)?;

    for f in features {
        let fields = f.output_fields();
        let mut record = vec![f.fid.to_string()];
        record.extend(attribute_keys.iter().map(|k| f.attributes.get(*k).map(cell).unwrap_or_default()));
        record.extend(computed.iter().map(|name| {
            fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| cell(v))
                .unwrap_or_default()
        }));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_feature_csv_file(path: &Path, features: &[FeatureExposure]) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_feature_csv(BufWriter::new(file), features).with_context(|| format!("writing {}", path.display()))
}

pub fn write_report_file(path: &Path, summary: &ExposureSummary) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write_report(&mut out, summary, Local::now()).with_context(|| format!("writing {}", path.display()))?;
    out.flush()?;
    Ok(())
}

pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, value).with_context(|| format!("writing {}", path.display()))?;
    out.flush()?;
    Ok(())
}

pub fn write_text_file(path: &Path, text: &str) -> anyhow::Result<()> {
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use slr_exposure::{FeatureStatus, InundationClass};

    fn feature(fid: u64, attributes: Map<String, Value>) -> FeatureExposure {
        FeatureExposure {
            fid,
            attributes,
            status: FeatureStatus::Sampled,
            count: 4,
            flooded_fraction: 0.25,
            sampled_area_m2: 400.0,
            polygon_area_m2: 400.0,
            flood_m2: 100.0,
            flood_pct: 25.0,
            coverage_pct: 100.0,
            class: InundationClass::from_pct(25.0, 10.0),
            population: None,
        }
    }

    #[test]
    fn test_cell_escapes_formulas() {
        assert_eq!(cell(&json!("=SUM(A1)")), "'=SUM(A1)");
        assert_eq!(cell(&json!("plain")), "plain");
        assert_eq!(cell(&json!(-3.5)), "-3.5");
        assert_eq!(cell(&Value::Null), "");
        assert_eq!(cell(&json!(true)), "true");
    }

    #[test]
    fn test_colliding_attributes_are_prefixed() {
        let mut attributes = Map::new();
        attributes.insert("fid".into(), json!("A-7"));
        attributes.insert("flood_pct".into(), json!(99.0));
        attributes.insert("src_fid".into(), json!("x"));
        attributes.insert("zone".into(), json!("north"));
        let mut buf = Vec::new();
        write_feature_csv(&mut buf, &[feature(7, attributes)]).unwrap();

        let mut rdr = csv::Reader::from_reader(buf.as_slice());
        let headers: Vec<String> = rdr.headers().unwrap().iter().map(str::to_string).collect();
        let mut unique = headers.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), headers.len());

        let row = rdr.records().next().unwrap().unwrap();
        let field = |name: &str| row[headers.iter().position(|h| h == name).unwrap()].to_string();
        assert_eq!(field("fid"), "7");
        assert_eq!(field("src_fid"), "A-7");
        assert_eq!(field("src_src_fid"), "x");
        assert_eq!(field("src_flood_pct"), "99.0");
        assert_eq!(field("flood_pct"), "25.0");
        assert_eq!(field("zone"), "north");
    }
}
