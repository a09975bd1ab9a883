use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use crate::data::SpanRecord;
use crate::error::EstimateError;

fn open_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("failed to open {path:?}"))?;
    let reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(reader)))
}

/// Parse one dataset of whitespace-separated `span a b nb` rows. Empty
/// lines and `#` comments are skipped; `.gz` inputs are decompressed
/// transparently.
pub fn parse_text_dataset(path: &Path) -> Result<Vec<SpanRecord>> {
    let mut reader = open_reader(path)?;
    let mut line = String::new();
    let mut row_no = 0usize;
    let mut out = Vec::new();

    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .with_context(|| format!("failed to read {path:?}"))?;
        if bytes == 0 {
            break;
        }
        row_no += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut cols = trimmed.split_whitespace();
        let span: u64 = next_field(&mut cols, "span", row_no, path)?
            .parse()
            .with_context(|| format!("invalid row {row_no} in {path:?}: bad span"))?;
        let a: i8 = next_field(&mut cols, "a", row_no, path)?
            .parse()
            .with_context(|| format!("invalid row {row_no} in {path:?}: bad genotype"))?;
        let b: u32 = next_field(&mut cols, "b", row_no, path)?
            .parse()
            .with_context(|| format!("invalid row {row_no} in {path:?}: bad derived count"))?;
        let nb: u32 = next_field(&mut cols, "nb", row_no, path)?
            .parse()
            .with_context(|| format!("invalid row {row_no} in {path:?}: bad panel size"))?;
        if cols.next().is_some() {
            return Err(EstimateError::Data(format!(
                "invalid row {row_no} in {path:?}: trailing fields"
            ))
            .into());
        }
        if !(-1..=2).contains(&a) {
            return Err(EstimateError::Data(format!(
                "invalid row {row_no} in {path:?}: genotype {a} out of range"
            ))
            .into());
        }
        if b > nb {
            return Err(EstimateError::Data(format!(
                "invalid row {row_no} in {path:?}: derived count {b} exceeds panel size {nb}"
            ))
            .into());
        }
        out.push(SpanRecord::new(span, a, b, nb));
    }

    if out.is_empty() {
        return Err(EstimateError::Data(format!("{path:?} contains no observations")).into());
    }
    Ok(out)
}

pub fn parse_text_datasets(paths: &[PathBuf]) -> Result<Vec<Vec<SpanRecord>>> {
    if paths.is_empty() {
        return Err(EstimateError::Data("no dataset files supplied".into()).into());
    }
    paths.iter().map(|p| parse_text_dataset(p)).collect()
}

fn next_field<'a>(
    cols: &mut impl Iterator<Item = &'a str>,
    name: &str,
    row_no: usize,
    path: &Path,
) -> Result<&'a str> {
    cols.next().ok_or_else(|| {
        EstimateError::Data(format!("invalid row {row_no} in {path:?}: missing {name}")).into()
    })
}
