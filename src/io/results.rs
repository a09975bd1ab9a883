use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Persisted estimation result: the demographic model alongside the
/// reference population size that scales it back to physical units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultFile {
    pub n0: f64,
    pub s: Vec<f64>,
    pub x: Vec<f64>,
}

pub fn save_result(path: &Path, result: &ResultFile) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, result)
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}

pub fn load_result(path: &Path) -> Result<ResultFile> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let reader = BufReader::new(file);
    let result =
        serde_json::from_reader(reader).with_context(|| format!("failed to parse {:?}", path))?;
    Ok(result)
}
