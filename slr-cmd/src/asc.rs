//! ESRI ASCII grid (`.asc`) reading and writing.
//!
//! The format carries no CRS, so callers pass it alongside the file.

use anyhow::{anyhow, bail, Context};
use log::info;
use slr_exposure::{
    grid::{MASK_DRY, MASK_FLOODED, MASK_NODATA},
    Crs, ElevationGrid, ElevationSource, GeoTransform, InundationMask, MaskSink, RasterGeometry,
};
use slr_tables::error::Result as TableResult;
use std::{
    borrow::Cow,
    collections::HashMap,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Largest grid the command layer will load.
pub const MAX_GRID_CELLS: usize = 200_000_000;

/// Parse an ASCII grid into elevations.
pub fn parse_asc(text: &str, crs: Option<Crs>) -> anyhow::Result<ElevationGrid> {
    let mut header: HashMap<String, f64> = HashMap::new();
    let mut lines = text.lines();
    let mut first_row = None;
    for line in lines.by_ref() {
        let mut parts = line.split_whitespace();
        let key = match parts.next() {
            Some(k) => k,
            None => continue,
        };
        if key.parse::<f64>().is_ok() {
            first_row = Some(line);
            break;
        }
        let raw = parts.next().ok_or_else(|| anyhow!("header '{}' has no value", key))?;
        let value = raw
            .parse::<f64>()
            .with_context(|| format!("header '{}' value '{}' is not a number", key, raw))?;
        header.insert(key.to_ascii_lowercase(), value);
    }

    let get = |k: &str| header.get(k).copied();
    let ncols = get("ncols").ok_or_else(|| anyhow!("missing ncols"))?;
    let nrows = get("nrows").ok_or_else(|| anyhow!("missing nrows"))?;
    if ncols < 1.0 || nrows < 1.0 || ncols.fract() != 0.0 || nrows.fract() != 0.0 {
        bail!("invalid grid size {} x {}", ncols, nrows);
    }
    let (ncols, nrows) = (ncols as usize, nrows as usize);
    let cells = ncols
        .checked_mul(nrows)
        .filter(|n| *n <= MAX_GRID_CELLS)
        .ok_or_else(|| anyhow!("grid of {} x {} cells exceeds {} cells", ncols, nrows, MAX_GRID_CELLS))?;

    let (dx, dy) = match (get("cellsize"), get("dx"), get("dy")) {
        (Some(c), _, _) => (c, c),
        (None, Some(dx), Some(dy)) => (dx, dy),
        _ => bail!("missing cellsize (or dx/dy)"),
    };
    if !(dx > 0.0 && dy > 0.0) {
        bail!("cell size must be positive, got {} x {}", dx, dy);
    }
    let min_x = match (get("xllcorner"), get("xllcenter")) {
        (Some(x), _) => x,
        (None, Some(x)) => x - dx / 2.0,
        _ => bail!("missing xllcorner/xllcenter"),
    };
    let min_y = match (get("yllcorner"), get("yllcenter")) {
        (Some(y), _) => y,
        (None, Some(y)) => y - dy / 2.0,
        _ => bail!("missing yllcorner/yllcenter"),
    };
    let nodata = get("nodata_value").map(|v| v as f32);

    let mut data = Vec::with_capacity(cells);
    for token in first_row.into_iter().chain(lines).flat_map(str::split_whitespace) {
        let v = token
            .parse::<f32>()
            .with_context(|| format!("cell {} value '{}' is not a number", data.len(), token))?;
        data.push(v);
    }
    if data.len() != cells {
        bail!("expected {} cell values, found {}", cells, data.len());
    }

    let max_y = min_y + nrows as f64 * dy;
    let geometry = RasterGeometry::new(ncols, nrows, GeoTransform::north_up(min_x, max_y, dx, dy), crs);
    Ok(ElevationGrid::new(geometry, data, nodata)?)
}

/// Read a mask written by [`write_mask_asc`] (or any 0/1 grid).
pub fn parse_mask_asc(text: &str, crs: Option<Crs>) -> anyhow::Result<InundationMask> {
    let grid = parse_asc(text, crs)?;
    let data = grid
        .data
        .iter()
        .map(|v| {
            if grid.is_nodata(*v) {
                MASK_NODATA
            } else if *v > 0.0 {
                MASK_FLOODED
            } else {
                MASK_DRY
            }
        })
        .collect();
    Ok(InundationMask::new(grid.geometry, data)?)
}

/// Write `mask` as an ASCII grid; nodata cells are written as 255.
pub fn write_mask_asc<W: Write>(out: &mut W, mask: &InundationMask) -> std::io::Result<()> {
    let g = &mask.geometry;
    let extent = g.extent();
    let (dx, dy) = g.pixel_size();
    writeln!(out, "ncols        {}", g.width)?;
    writeln!(out, "nrows        {}", g.height)?;
    writeln!(out, "xllcorner    {}", extent.min_x)?;
    writeln!(out, "yllcorner    {}", extent.min_y)?;
    if dx == dy {
        writeln!(out, "cellsize     {}", dx)?;
    } else {
        writeln!(out, "dx           {}", dx)?;
        writeln!(out, "dy           {}", dy)?;
    }
    writeln!(out, "NODATA_value {}", MASK_NODATA)?;
    for row in mask.data.chunks(g.width.max(1)) {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(out, "{}", line.join(" "))?;
    }
    Ok(())
}

/// A DEM loaded from an `.asc` file.
pub struct AscDem {
    path: PathBuf,
    grid: ElevationGrid,
}

impl AscDem {
    pub fn open(path: &Path, crs: Option<Crs>) -> anyhow::Result<AscDem> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading DEM {}", path.display()))?;
        let grid = parse_asc(&text, crs).with_context(|| format!("parsing DEM {}", path.display()))?;
        info!(
            "Loaded DEM {}: {} x {} cells, pixel {:?}, CRS {}",
            path.display(),
            grid.geometry.width,
            grid.geometry.height,
            grid.geometry.pixel_size(),
            crs.map(|c| c.to_string()).unwrap_or_else(|| "unknown".into())
        );
        Ok(AscDem {
            path: path.to_path_buf(),
            grid,
        })
    }
}

impl ElevationSource for AscDem {
    fn source_id(&self) -> String {
        self.path.display().to_string()
    }

    fn geometry(&self) -> &RasterGeometry {
        &self.grid.geometry
    }

    fn grid(&self) -> TableResult<Cow<'_, ElevationGrid>> {
        Ok(Cow::Borrowed(&self.grid))
    }
}

/// Writes each mask to `<dir>/<output_id>.asc`.
pub struct AscMaskSink {
    dir: PathBuf,
}

impl AscMaskSink {
    pub fn new(dir: &Path) -> anyhow::Result<AscMaskSink> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating output directory {}", dir.display()))?;
        Ok(AscMaskSink { dir: dir.to_path_buf() })
    }
}

impl MaskSink for AscMaskSink {
    fn write_mask(&mut self, output_id: &str, mask: &InundationMask) -> TableResult<String> {
        let path = self.dir.join(format!("{}.asc", output_id));
        let mut out = BufWriter::new(File::create(&path)?);
        write_mask_asc(&mut out, mask)?;
        out.flush()?;
        Ok(path.display().to_string())
    }
}
