use anyhow::Result;

use crate::error::EstimateError;

/// One observation: a run of `span` consecutive sites sharing a genotype
/// category. `a` is the distinguished-pair genotype (-1 missing, 0
/// hom-ancestral, 1 het, 2 hom-derived); `b` counts derived copies among
/// `nb` observed undistinguished haplotypes. `nb` doubles as the
/// sample-size marker: `n = 2 + max(nb)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanRecord {
    pub span: u64,
    pub a: i8,
    pub b: u32,
    pub nb: u32,
}

impl SpanRecord {
    pub fn new(span: u64, a: i8, b: u32, nb: u32) -> Self {
        Self { span, a, b, nb }
    }
}

/// Per-segment diagnostics emitted by span breaking.
#[derive(Debug, Clone, Copy)]
pub struct SegmentSummary {
    pub spans: usize,
    pub derived_bases: u64,
    pub total_bases: u64,
    pub het: f64,
}

/// Rejects datasets the rest of the pipeline cannot work with: an empty
/// dataset list, an empty dataset, or one whose records all have zero span.
pub fn validate_datasets(datasets: &[Vec<SpanRecord>]) -> Result<()> {
    if datasets.is_empty() {
        return Err(EstimateError::Data("no datasets supplied".into()).into());
    }
    for (i, ds) in datasets.iter().enumerate() {
        if ds.is_empty() {
            return Err(EstimateError::Data(format!("dataset {i} is empty")).into());
        }
        if ds.iter().all(|r| r.span == 0) {
            return Err(EstimateError::Data(format!(
                "dataset {i} is malformed: every record has zero span"
            ))
            .into());
        }
        for (j, r) in ds.iter().enumerate() {
            if !(-1..=2).contains(&r.a) {
                return Err(EstimateError::Data(format!(
                    "dataset {i} record {j}: genotype {} out of range", r.a
                ))
                .into());
            }
            if r.b > r.nb {
                return Err(EstimateError::Data(format!(
                    "dataset {i} record {j}: derived count {} exceeds panel size {}",
                    r.b, r.nb
                ))
                .into());
            }
        }
    }
    Ok(())
}

/// `n = 2 + max(nb)` across every record of every dataset.
pub fn sample_size(datasets: &[Vec<SpanRecord>]) -> Result<u32> {
    validate_datasets(datasets)?;
    let max_nb = datasets
        .iter()
        .flat_map(|ds| ds.iter())
        .map(|r| r.nb)
        .max()
        .unwrap_or(0);
    Ok(2 + max_nb)
}

/// Keep full undistinguished information only at every `thinning`-th site;
/// sites in between retain the distinguished genotype with the panel
/// hidden (`b = 0, nb = 0`). The first site of each dataset is always a
/// retained site, so the output is never all-hidden. Genomic length is
/// preserved exactly.
pub fn thin_dataset(datasets: &[Vec<SpanRecord>], thinning: u64) -> Result<Vec<Vec<SpanRecord>>> {
    if thinning == 0 {
        return Err(EstimateError::Data("thinning interval must be > 0".into()).into());
    }
    let mut out = Vec::with_capacity(datasets.len());
    for ds in datasets {
        let mut thinned: Vec<SpanRecord> = Vec::with_capacity(ds.len());
        let mut pos: u64 = 0;
        for rec in ds {
            let mut left = rec.span;
            while left > 0 {
                let offset = pos % thinning;
                if offset == 0 {
                    push_merged(&mut thinned, SpanRecord::new(1, rec.a, rec.b, rec.nb));
                    pos += 1;
                    left -= 1;
                } else {
                    let take = (thinning - offset).min(left);
                    push_merged(&mut thinned, SpanRecord::new(take, rec.a, 0, 0));
                    pos += take;
                    left -= take;
                }
            }
        }
        out.push(thinned);
    }
    Ok(out)
}

fn push_merged(out: &mut Vec<SpanRecord>, rec: SpanRecord) {
    if let Some(last) = out.last_mut() {
        if last.a == rec.a && last.b == rec.b && last.nb == rec.nb {
            last.span += rec.span;
            return;
        }
    }
    out.push(rec);
}

/// Break each dataset into independent segments and bound span lengths.
///
/// A missing-data run (`a == -1, b == 0`) at least `span_cutoff` long is a
/// segment boundary: the run is dropped and the flanks become separate
/// segments, so no HMM chain crosses an uninformative gap. Inside a
/// segment, records longer than `length_cutoff` are split into sub-records
/// of at most `length_cutoff` sites carrying the identical per-site
/// category. Idempotent once both cutoffs hold.
pub fn break_long_spans(
    datasets: &[Vec<SpanRecord>],
    span_cutoff: u64,
    length_cutoff: u64,
) -> Result<(Vec<Vec<SpanRecord>>, Vec<Vec<SegmentSummary>>)> {
    if span_cutoff == 0 || length_cutoff == 0 {
        return Err(EstimateError::Data("span and length cutoffs must be > 0".into()).into());
    }
    validate_datasets(datasets)?;

    let mut segments = Vec::new();
    let mut summaries = Vec::with_capacity(datasets.len());
    for ds in datasets {
        let mut per_dataset = Vec::new();
        let mut current: Vec<SpanRecord> = Vec::new();
        for rec in ds {
            if rec.a == -1 && rec.b == 0 && rec.span >= span_cutoff {
                flush_segment(&mut current, &mut segments, &mut per_dataset);
                continue;
            }
            push_merged(&mut current, *rec);
            cap_runs(&mut current, length_cutoff);
        }
        flush_segment(&mut current, &mut segments, &mut per_dataset);
        if per_dataset.is_empty() {
            return Err(EstimateError::Data(
                "dataset reduced to nothing after span breaking".into(),
            )
            .into());
        }
        summaries.push(per_dataset);
    }
    Ok((segments, summaries))
}

/// Re-split any run that `push_merged` grew past the cutoff.
fn cap_runs(records: &mut Vec<SpanRecord>, length_cutoff: u64) {
    let Some(last) = records.pop() else {
        return;
    };
    if last.span <= length_cutoff {
        records.push(last);
        return;
    }
    let mut left = last.span;
    while left > 0 {
        let take = left.min(length_cutoff);
        records.push(SpanRecord::new(take, last.a, last.b, last.nb));
        left -= take;
    }
}

fn flush_segment(
    current: &mut Vec<SpanRecord>,
    segments: &mut Vec<Vec<SpanRecord>>,
    summaries: &mut Vec<SegmentSummary>,
) {
    if current.is_empty() {
        return;
    }
    let seg = std::mem::take(current);
    summaries.push(summarize(&seg));
    segments.push(seg);
}

fn summarize(segment: &[SpanRecord]) -> SegmentSummary {
    let mut derived = 0u64;
    let mut total = 0u64;
    for r in segment {
        if r.a >= 0 {
            total += r.span;
            if r.a > 0 || r.b > 0 {
                derived += r.span;
            }
        }
    }
    let het = if total > 0 {
        derived as f64 / total as f64
    } else {
        0.0
    };
    SegmentSummary {
        spans: segment.len(),
        derived_bases: derived,
        total_bases: total,
        het,
    }
}
