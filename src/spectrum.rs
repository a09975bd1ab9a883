use anyhow::Result;
use ndarray::Array2;

use crate::data::SpanRecord;
use crate::error::EstimateError;

/// Span-weighted empirical frequency spectrum for one dataset.
///
/// Shape is `(3, n - 1)`: rows index the distinguished-pair derived count
/// (0, 1, 2), columns the derived count among the `n - 2` undistinguished
/// haplotypes. Only fully observed sites contribute (`a >= 0` and
/// `nb == n - 2`), which excludes the panel-hidden records thinning
/// produces. Normalized to sum to one.
pub fn empirical_spectrum(dataset: &[SpanRecord], n: u32) -> Result<Array2<f64>> {
    if n < 2 {
        return Err(EstimateError::Data(format!("sample size {n} is below 2")).into());
    }
    let cols = (n - 1) as usize;
    let mut table = Array2::<f64>::zeros((3, cols));
    let mut weight = 0.0;
    for rec in dataset {
        if rec.span == 0 || rec.a < 0 || rec.nb != n - 2 {
            continue;
        }
        let row = rec.a as usize;
        let col = rec.b as usize;
        if col >= cols {
            return Err(EstimateError::Data(format!(
                "derived count {} exceeds n - 2 = {}",
                rec.b,
                n - 2
            ))
            .into());
        }
        let w = rec.span as f64;
        table[(row, col)] += w;
        weight += w;
    }
    if weight <= 0.0 {
        return Err(
            EstimateError::Data("dataset has no fully observed sites for the spectrum".into())
                .into(),
        );
    }
    table.mapv_inplace(|v| v / weight);
    Ok(table)
}

/// Element-wise arithmetic mean across datasets. Every dataset counts as
/// one evidence unit regardless of how many observations it holds.
pub fn mean_spectrum(spectra: &[Array2<f64>]) -> Result<Array2<f64>> {
    let Some(first) = spectra.first() else {
        return Err(EstimateError::Data("no spectra to aggregate".into()).into());
    };
    let mut acc = first.clone();
    for sp in &spectra[1..] {
        if sp.dim() != acc.dim() {
            return Err(EstimateError::Data(format!(
                "spectrum shape {:?} does not match {:?}",
                sp.dim(),
                acc.dim()
            ))
            .into());
        }
        acc += sp;
    }
    let k = spectra.len() as f64;
    acc.mapv_inplace(|v| v / k);
    Ok(acc)
}
