use anyhow::{bail, Result};
use ndarray::Array2;

use crate::data::SpanRecord;
use crate::error::EstimateError;
use crate::model::DemographicModel;

/// Interface the orchestrator requires of an inference engine.
///
/// An engine is built once from the prepared dataset and the fixed hidden
/// states, then receives every model/theta/rho update through the setters.
/// The read accessors return the engine's installed copies so the sync
/// invariant stays externally checkable.
pub trait InferenceEngine: Sized {
    fn new(n_classes: usize, dataset: &[Vec<SpanRecord>], hidden_states: &[f64]) -> Result<Self>;

    fn set_model(&mut self, model: &DemographicModel) -> Result<()>;
    fn set_theta(&mut self, theta: f64) -> Result<()>;
    fn set_rho(&mut self, rho: f64) -> Result<()>;

    fn model_x(&self) -> Option<&[f64]>;
    fn theta(&self) -> Option<f64>;
    fn rho(&self) -> Option<f64>;

    /// Expected complete-data log-likelihood of the current parameters
    /// under the posteriors cached by the last E-step.
    fn q(&self) -> Result<f64>;
    /// Forward-backward over the dataset; caches sufficient statistics and
    /// returns the data log-likelihood.
    fn e_step(&mut self) -> Result<f64>;
    /// Log-likelihood from the last E-step.
    fn loglik(&self) -> Result<f64>;
}

/// Reference points for `m` target intervals: the pair-coalescent
/// quantiles `i/m` under the model, opening at time zero and closing just
/// short of the distribution's tail.
pub fn balance_hidden_states(model: &DemographicModel, m: usize) -> Result<Vec<f64>> {
    if m == 0 {
        return Err(
            EstimateError::Discretization("at least one hidden interval is required".into())
                .into(),
        );
    }
    let mut hs = Vec::with_capacity(m + 1);
    hs.push(0.0);
    for i in 1..m {
        hs.push(model.quantile(i as f64 / m as f64)?);
    }
    hs.push(model.quantile(1.0 - 0.1 / m as f64)?);
    for w in hs.windows(2) {
        if !w[1].is_finite() || w[1] <= w[0] {
            return Err(EstimateError::Discretization(format!(
                "balancing produced non-increasing reference points {} and {}",
                w[0], w[1]
            ))
            .into());
        }
    }
    Ok(hs)
}

/// Union of the balancer's reference points with the model's cumulative
/// breakpoints below the first positive reference point, sorted and
/// deduplicated. A model with no breakpoint under that bound degenerates
/// to exactly the reference points.
pub fn merge_hidden_states(model: &DemographicModel, hs: &[f64]) -> Result<Vec<f64>> {
    if hs.len() < 2 {
        return Err(EstimateError::Discretization(format!(
            "balancer returned {} reference points, need at least two",
            hs.len()
        ))
        .into());
    }
    let bound = hs[1];
    let mut all: Vec<f64> = hs.to_vec();
    all.extend(model.breakpoints().into_iter().filter(|c| *c <= bound));
    all.sort_by(|a, b| a.total_cmp(b));
    all.dedup_by(|a, b| (*a - *b).abs() <= 1e-12 * b.abs().max(1.0));
    if all.len() < 2 {
        return Err(
            EstimateError::Discretization("fewer than two usable hidden states remain".into())
                .into(),
        );
    }
    Ok(all)
}

#[derive(Debug, Clone)]
struct SufficientStats {
    gobs: [Vec<f64>; 3],
    xi: Array2<f64>,
    first: Vec<Vec<f64>>,
    loglike: f64,
}

/// Reference coalescent-HMM engine.
///
/// Hidden states are the intervals between consecutive cutpoints (the last
/// one unbounded). The prior is the model's coalescent mass per interval,
/// transitions mix identity with the prior at recombination rate `rho`,
/// and emissions depend on the distinguished-pair genotype through the
/// conditional mean coalescence time of each interval.
#[derive(Debug)]
pub struct HmmEngine {
    sequences: Vec<Vec<SpanRecord>>,
    hidden_states: Vec<f64>,
    model: Option<DemographicModel>,
    theta: Option<f64>,
    rho: Option<f64>,
    pi: Vec<f64>,
    trans: Array2<f64>,
    emit: Array2<f64>,
    stats: Option<SufficientStats>,
}

#[inline]
fn obs_class(rec: &SpanRecord) -> usize {
    if rec.a < 0 {
        2
    } else if rec.a == 1 {
        1
    } else {
        0
    }
}

impl HmmEngine {
    pub fn n_states(&self) -> usize {
        self.hidden_states.len()
    }

    pub fn hidden_states(&self) -> &[f64] {
        &self.hidden_states
    }

    fn recalculate(&mut self) -> Result<()> {
        let computed = match (self.model.as_ref(), self.theta, self.rho) {
            (Some(model), Some(theta), Some(rho)) => {
                if !(theta > 0.0) || !(rho > 0.0) {
                    bail!("theta and rho must be positive, got theta={theta}, rho={rho}");
                }
                let hs = &self.hidden_states;
                let ns = hs.len();
                let mut pi = vec![0.0f64; ns];
                let mut tmean = vec![0.0f64; ns];
                for k in 0..ns {
                    let lo = hs[k];
                    let hi = if k + 1 < ns { Some(hs[k + 1]) } else { None };
                    pi[k] = model.interval_mass(lo, hi);
                    tmean[k] = model.interval_mean(lo, hi);
                }
                let mass: f64 = pi.iter().sum();
                if mass <= 0.0 {
                    bail!("model places no coalescent mass on the hidden states");
                }
                for p in pi.iter_mut() {
                    *p /= mass;
                }

                let mut emit = Array2::<f64>::zeros((3, ns));
                for k in 0..ns {
                    let hom = (-theta * tmean[k]).exp();
                    emit[(0, k)] = hom;
                    emit[(1, k)] = 1.0 - hom;
                    emit[(2, k)] = 1.0;
                }

                let stay = (-rho).exp();
                let mut trans = Array2::<f64>::zeros((ns, ns));
                for i in 0..ns {
                    for j in 0..ns {
                        let mut v = (1.0 - stay) * pi[j];
                        if i == j {
                            v += stay;
                        }
                        trans[(i, j)] = v;
                    }
                }
                Some((pi, emit, trans))
            }
            _ => None,
        };
        if let Some((pi, emit, trans)) = computed {
            self.pi = pi;
            self.emit = emit;
            self.trans = trans;
        }
        Ok(())
    }

    fn ready(&self) -> Result<()> {
        if self.model.is_none() || self.theta.is_none() || self.rho.is_none() {
            bail!("engine parameters are not fully set");
        }
        Ok(())
    }

    /// Scaled forward pass over one expanded sequence.
    fn forward(&self, classes: &[u8], alpha: &mut [f64], cnorm: &mut [f64]) -> Result<f64> {
        let ns = self.pi.len();
        let mut loglike = 0.0;
        for (t, &cls) in classes.iter().enumerate() {
            let o = cls as usize;
            let mut norm = 0.0;
            if t == 0 {
                for k in 0..ns {
                    let v = self.pi[k] * self.emit[(o, k)];
                    alpha[k] = v;
                    norm += v;
                }
            } else {
                let (done, rest) = alpha.split_at_mut(t * ns);
                let prev = &done[(t - 1) * ns..];
                let cur = &mut rest[..ns];
                for (k, c) in cur.iter_mut().enumerate() {
                    let mut dot = 0.0;
                    for (i, p) in prev.iter().enumerate() {
                        dot += p * self.trans[(i, k)];
                    }
                    let v = dot * self.emit[(o, k)];
                    *c = v;
                    norm += v;
                }
            }
            if norm <= 0.0 {
                bail!("zero normalization in forward pass at site {t}");
            }
            cnorm[t] = norm;
            for v in alpha[t * ns..(t + 1) * ns].iter_mut() {
                *v /= norm;
            }
            loglike += norm.ln();
        }
        Ok(loglike)
    }

    /// Backward pass accumulating posteriors into the running statistics.
    fn accumulate(
        &self,
        classes: &[u8],
        alpha: &[f64],
        cnorm: &[f64],
        stats: &mut SufficientStats,
    ) {
        let ns = self.pi.len();
        let s_max = classes.len();
        let mut beta = vec![1.0f64; ns];
        let mut beta_new = vec![0.0f64; ns];
        for t in (0..s_max).rev() {
            let o = classes[t] as usize;
            let alpha_t = &alpha[t * ns..(t + 1) * ns];
            for k in 0..ns {
                stats.gobs[o][k] += alpha_t[k] * beta[k];
            }
            if t == 0 {
                let first: Vec<f64> = (0..ns).map(|k| alpha_t[k] * beta[k]).collect();
                stats.first.push(first);
                break;
            }
            let inv_norm = 1.0 / cnorm[t];
            let alpha_prev = &alpha[(t - 1) * ns..t * ns];
            for i in 0..ns {
                let scale = alpha_prev[i] * inv_norm;
                let mut acc = 0.0;
                for j in 0..ns {
                    let emit_beta = self.emit[(o, j)] * beta[j];
                    let tr = self.trans[(i, j)];
                    stats.xi[(i, j)] += scale * tr * emit_beta;
                    acc += tr * emit_beta;
                }
                beta_new[i] = acc * inv_norm;
            }
            std::mem::swap(&mut beta, &mut beta_new);
        }
    }
}

impl InferenceEngine for HmmEngine {
    fn new(n_classes: usize, dataset: &[Vec<SpanRecord>], hidden_states: &[f64]) -> Result<Self> {
        if dataset.is_empty() {
            return Err(EstimateError::Data("engine dataset is empty".into()).into());
        }
        for (i, seq) in dataset.iter().enumerate() {
            if seq.iter().map(|r| r.span).sum::<u64>() == 0 {
                return Err(
                    EstimateError::Data(format!("engine sequence {i} has zero length")).into(),
                );
            }
            for rec in seq {
                if rec.nb as usize > n_classes {
                    return Err(EstimateError::Data(format!(
                        "sequence {i}: panel size {} exceeds engine classes {n_classes}",
                        rec.nb
                    ))
                    .into());
                }
            }
        }
        if hidden_states.len() < 2 {
            return Err(EstimateError::Discretization(
                "engine needs at least two hidden-state cutpoints".into(),
            )
            .into());
        }
        for w in hidden_states.windows(2) {
            if !(w[0] >= 0.0 && w[1] > w[0]) {
                return Err(EstimateError::Discretization(format!(
                    "hidden states must be non-negative and strictly increasing, got {} then {}",
                    w[0], w[1]
                ))
                .into());
            }
        }
        let ns = hidden_states.len();
        Ok(Self {
            sequences: dataset.to_vec(),
            hidden_states: hidden_states.to_vec(),
            model: None,
            theta: None,
            rho: None,
            pi: vec![0.0; ns],
            trans: Array2::zeros((ns, ns)),
            emit: Array2::zeros((3, ns)),
            stats: None,
        })
    }

    fn set_model(&mut self, model: &DemographicModel) -> Result<()> {
        self.model = Some(model.clone());
        self.recalculate()
    }

    fn set_theta(&mut self, theta: f64) -> Result<()> {
        self.theta = Some(theta);
        self.recalculate()
    }

    fn set_rho(&mut self, rho: f64) -> Result<()> {
        self.rho = Some(rho);
        self.recalculate()
    }

    fn model_x(&self) -> Option<&[f64]> {
        self.model.as_ref().map(|m| m.x())
    }

    fn theta(&self) -> Option<f64> {
        self.theta
    }

    fn rho(&self) -> Option<f64> {
        self.rho
    }

    fn q(&self) -> Result<f64> {
        self.ready()?;
        let Some(stats) = &self.stats else {
            bail!("E-step has not been run");
        };
        let ns = self.pi.len();
        let ln = |v: f64| v.max(1e-300).ln();
        let mut q = 0.0;
        for first in &stats.first {
            for k in 0..ns {
                q += first[k] * ln(self.pi[k]);
            }
        }
        for i in 0..ns {
            for j in 0..ns {
                q += stats.xi[(i, j)] * ln(self.trans[(i, j)]);
            }
        }
        for o in 0..3 {
            for k in 0..ns {
                q += stats.gobs[o][k] * ln(self.emit[(o, k)]);
            }
        }
        Ok(q)
    }

    fn e_step(&mut self) -> Result<f64> {
        self.ready()?;
        let ns = self.pi.len();
        let mut stats = SufficientStats {
            gobs: [vec![0.0; ns], vec![0.0; ns], vec![0.0; ns]],
            xi: Array2::zeros((ns, ns)),
            first: Vec::with_capacity(self.sequences.len()),
            loglike: 0.0,
        };
        for seq in &self.sequences {
            let total: usize = seq.iter().map(|r| r.span as usize).sum();
            let mut classes = Vec::with_capacity(total);
            for rec in seq {
                let cls = obs_class(rec) as u8;
                classes.extend(std::iter::repeat(cls).take(rec.span as usize));
            }
            if classes.is_empty() {
                continue;
            }
            let mut alpha = vec![0.0f64; classes.len() * ns];
            let mut cnorm = vec![0.0f64; classes.len()];
            stats.loglike += self.forward(&classes, &mut alpha, &mut cnorm)?;
            self.accumulate(&classes, &alpha, &cnorm, &mut stats);
        }
        let loglike = stats.loglike;
        self.stats = Some(stats);
        Ok(loglike)
    }

    fn loglik(&self) -> Result<f64> {
        match &self.stats {
            Some(stats) => Ok(stats.loglike),
            None => bail!("E-step has not been run"),
        }
    }
}
