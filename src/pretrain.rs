use anyhow::Result;
use ndarray::Array2;

use crate::error::EstimateError;
use crate::model::DemographicModel;
use crate::opt::{minimize_bounded, Bounds, OptConfig};

/// Penalty applied to successive differences of the log relative sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regularizer {
    Quadratic,
    Abs,
}

/// Smoothness penalty on the model: `penalty * sum f(ln x[k+1] - ln x[k])`.
pub fn penalize(model: &DemographicModel, penalty: f64, f: Regularizer) -> f64 {
    let x = model.x();
    if x.len() < 2 {
        return 0.0;
    }
    let mut sum = 0.0;
    for k in 0..x.len() - 1 {
        let d = x[k + 1].ln() - x[k].ln();
        sum += match f {
            Regularizer::Quadratic => d * d,
            Regularizer::Abs => d.abs(),
        };
    }
    penalty * sum
}

fn binom2(k: u32) -> f64 {
    (k as f64) * (k as f64 - 1.0) / 2.0
}

fn choose(n: u32, k: u32) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    let mut acc = 1.0;
    for i in 0..k {
        acc = acc * (n - i) as f64 / (i + 1) as f64;
    }
    acc
}

/// Expected site spectrum under the model, first-moment approximation.
///
/// Inter-coalescent epochs are replaced by their staged means (the elapsed
/// time over which the level-k hazard accumulates one unit), mutations
/// land on branches proportionally to level length, and subtree sizes
/// follow the Kingman formula `C(n-i-1, k-2) / C(n-1, k-1)`. The
/// distinguished pair is a uniform draw of two leaves, so its derived
/// count is hypergeometric given the subtree size. Good enough to anchor
/// pretraining; the inference engine never sees this table.
pub fn expected_spectrum(model: &DemographicModel, n: u32, theta: f64) -> Result<Array2<f64>> {
    if n < 2 {
        return Err(EstimateError::Data(format!("sample size {n} is below 2")).into());
    }
    if !(theta.is_finite() && theta > 0.0) {
        return Err(EstimateError::Bounds(format!("theta must be positive, got {theta}")).into());
    }
    let cols = (n - 1) as usize;
    let mut table = Array2::<f64>::zeros((3, cols));

    // staged mean epoch durations, most recent level first consumed
    let mut tau = 0.0;
    let mut level_len = vec![0.0f64; (n + 1) as usize]; // k * d_k, indexed by k
    for k in (2..=n).rev() {
        let d = model.elapsed_for_hazard(tau, 1.0 / binom2(k));
        level_len[k as usize] = k as f64 * d;
        tau += d;
    }
    let total_len: f64 = level_len.iter().sum();

    // mutation subtends i of n leaves
    let mut w = vec![0.0f64; n as usize]; // indexed by i, 1..=n-1
    for k in 2..=n {
        let denom = choose(n - 1, k - 1);
        if denom <= 0.0 {
            continue;
        }
        for i in 1..=(n - k + 1) {
            w[i as usize] += level_len[k as usize] * choose(n - i - 1, k - 2) / denom;
        }
    }
    let w_total: f64 = w.iter().sum();

    let p_seg = (1.0 - (-0.5 * theta * total_len).exp()).clamp(0.0, 1.0 - 1e-12);
    let pair_pairs = choose(n, 2);
    for i in 1..n {
        let q_i = w[i as usize] / w_total;
        for j in 0..=2u32.min(i) {
            let h = choose(i, j) * choose(n - i, 2 - j) / pair_pairs;
            if h <= 0.0 {
                continue;
            }
            let b = (i - j) as usize;
            if b < cols {
                table[(j as usize, b)] += p_seg * q_i * h;
            }
        }
    }
    table[(0, 0)] += 1.0 - p_seg;
    Ok(table)
}

/// Fit the model and a mutation scale to the aggregated empirical spectrum.
///
/// Minimizes `KL(sfs || expected) + penalty` over the per-piece sizes
/// (inside the caller's bounds) and theta (inside a wide bracket around
/// `theta0`). Mutates `model.x` in place and returns the fitted theta.
/// Non-convergence is an error; it is never papered over.
pub fn pretrain(
    model: &mut DemographicModel,
    sfs: &Array2<f64>,
    bounds: &[Bounds],
    theta0: f64,
    penalizer: impl Fn(&DemographicModel) -> f64,
) -> Result<f64> {
    if sfs.nrows() != 3 || sfs.ncols() == 0 {
        return Err(EstimateError::Data(format!(
            "spectrum shape {:?} is not (3, n - 1)",
            sfs.dim()
        ))
        .into());
    }
    let n = sfs.ncols() as u32 + 1;
    let k = model.num_pieces();
    if bounds.len() != k {
        return Err(EstimateError::Bounds(format!(
            "{} bounds supplied for a model with {} pieces",
            bounds.len(),
            k
        ))
        .into());
    }
    if !(theta0.is_finite() && theta0 > 0.0) {
        return Err(
            EstimateError::Bounds(format!("initial theta must be positive, got {theta0}")).into(),
        );
    }

    let mut all_bounds = bounds.to_vec();
    all_bounds.push(Bounds {
        lo: theta0 * 1e-3,
        hi: theta0 * 1e3,
    });
    let mut x0 = model.x().to_vec();
    x0.push(theta0);

    let base = model.clone();
    let cost = |params: &[f64]| -> Result<f64> {
        let mut candidate = base.clone();
        candidate.x_mut().copy_from_slice(&params[..k]);
        let theta = params[k];
        let expected = expected_spectrum(&candidate, n, theta)?;
        let mut kl = 0.0;
        for (obs, exp) in sfs.iter().zip(expected.iter()) {
            if *obs > 0.0 {
                kl += obs * (obs / exp.max(1e-300)).ln();
            }
        }
        Ok(kl + penalizer(&candidate))
    };

    let fit = minimize_bounded(cost, &x0, &all_bounds, &OptConfig::default())?;
    if !fit.converged {
        return Err(EstimateError::Bounds("pretraining optimizer did not converge".into()).into());
    }
    model.x_mut().copy_from_slice(&fit.x[..k]);
    Ok(fit.x[k])
}
