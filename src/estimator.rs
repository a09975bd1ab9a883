use anyhow::Result;
use ndarray::Array2;
use std::path::{Path, PathBuf};

use crate::data::{self, SegmentSummary, SpanRecord};
use crate::engine::{balance_hidden_states, merge_hidden_states, HmmEngine, InferenceEngine};
use crate::error::EstimateError;
use crate::io;
use crate::model::DemographicModel;
use crate::opt::Bounds;
use crate::pretrain::{self, Regularizer};
use crate::spectrum;

/// Run-level switches, separate from the model/scaling inputs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub thinning: Option<u64>,
    pub regularization_penalty: f64,
    pub regularizer: Regularizer,
    pub no_pretrain: bool,
    pub span_cutoff: u64,
    pub length_cutoff: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            thinning: None,
            regularization_penalty: 1e-2,
            regularizer: Regularizer::Quadratic,
            no_pretrain: false,
            span_cutoff: 50_000,
            length_cutoff: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    /// Interval durations of the demographic model, most recent first.
    pub time_points: Vec<f64>,
    /// Extra geometric refinement pieces carved out of the first interval.
    pub exponential_pieces: usize,
    /// Reference population size; scales physical rates into theta/rho.
    pub n0: f64,
    /// Physical per-site mutation rate. `None` defers to pretraining.
    pub mu: Option<f64>,
    /// Physical per-site recombination rate. `None` defaults to theta/4.
    pub r: Option<f64>,
    /// Target hidden-state interval count for balancing.
    pub m: usize,
    /// Per-piece bounds on the relative sizes during pretraining.
    pub bounds: Vec<Bounds>,
    pub run: RunConfig,
}

/// Owner of the canonical model and scaled parameters.
///
/// Every mutation of `model`, `mu` or `rho` goes through a setter that
/// pushes the same value into the engine before returning, so the engine
/// is never stale. The dataset and hidden states are fixed at
/// construction; afterwards the object only cycles through parameter
/// updates and `reset()`.
#[derive(Debug)]
pub struct Estimator<E: InferenceEngine = HmmEngine> {
    n: u32,
    n0: f64,
    mu: f64,
    theta: f64,
    rho: f64,
    model: DemographicModel,
    init_x: Vec<f64>,
    hidden_states: Vec<f64>,
    sfs: Array2<f64>,
    penalty: f64,
    regularizer: Regularizer,
    summaries: Vec<Vec<SegmentSummary>>,
    engine: E,
}

impl<E: InferenceEngine> Estimator<E> {
    pub fn from_files(paths: &[PathBuf], config: &EstimatorConfig) -> Result<Self> {
        let datasets = io::text::parse_text_datasets(paths)?;
        Self::from_datasets(datasets, config)
    }

    /// Build the full pipeline: validate and thin the data, aggregate the
    /// spectrum, pretrain unless disabled, fix the hidden states from the
    /// (possibly pretrained) model, break long spans, construct the engine
    /// and push the initial parameters through the setters.
    pub fn from_datasets(datasets: Vec<Vec<SpanRecord>>, config: &EstimatorConfig) -> Result<Self> {
        if !(config.n0.is_finite() && config.n0 > 0.0) {
            return Err(EstimateError::Data(format!(
                "reference population size must be positive, got {}",
                config.n0
            ))
            .into());
        }
        // sample size comes from the raw data, before any thinning
        let n = data::sample_size(&datasets)?;
        let mut model = DemographicModel::new(&config.time_points, config.exponential_pieces)?;

        let datasets = match config.run.thinning {
            Some(k) => data::thin_dataset(&datasets, k)?,
            None => datasets,
        };

        let spectra = datasets
            .iter()
            .map(|ds| spectrum::empirical_spectrum(ds, n))
            .collect::<Result<Vec<_>>>()?;
        let sfs = spectrum::mean_spectrum(&spectra)?;

        let penalty = config.run.regularization_penalty;
        let regularizer = config.run.regularizer;
        let mut theta_hat = 2.0 * config.n0 * 1e-8;
        if !config.run.no_pretrain {
            theta_hat = pretrain::pretrain(&mut model, &sfs, &config.bounds, theta_hat, |m| {
                pretrain::penalize(m, penalty, regularizer)
            })?;
        }

        // snapshot for reset(), taken after pretraining settled the model
        let init_x = model.x().to_vec();

        let hs = balance_hidden_states(&model, config.m)?;
        let hidden_states = merge_hidden_states(&model, &hs)?;

        let (dataset, summaries) =
            data::break_long_spans(&datasets, config.run.span_cutoff, config.run.length_cutoff)?;

        let engine = E::new((n - 2) as usize, &dataset, &hidden_states)?;

        let mut est = Self {
            n,
            n0: config.n0,
            mu: 0.0,
            theta: 0.0,
            rho: 0.0,
            model,
            init_x,
            hidden_states,
            sfs,
            penalty,
            regularizer,
            summaries,
            engine,
        };
        match config.mu {
            Some(mu) => est.set_mu(mu)?,
            None => est.set_theta_scaled(theta_hat)?,
        }
        let rho = match config.r {
            Some(r) => 2.0 * config.n0 * r,
            None => est.theta / 4.0,
        };
        est.set_rho(rho)?;
        let model = est.model.clone();
        est.set_model(model)?;
        Ok(est)
    }

    /// Replace the model and push it to the engine in the same operation.
    pub fn set_model(&mut self, model: DemographicModel) -> Result<()> {
        self.engine.set_model(&model)?;
        self.model = model;
        Ok(())
    }

    /// Store the physical mutation rate and push `theta = 2 N0 mu`.
    pub fn set_mu(&mut self, mu: f64) -> Result<()> {
        self.mu = mu;
        self.theta = 2.0 * self.n0 * mu;
        self.engine.set_theta(self.theta)
    }

    fn set_theta_scaled(&mut self, theta: f64) -> Result<()> {
        self.theta = theta;
        self.mu = theta / (2.0 * self.n0);
        self.engine.set_theta(theta)
    }

    /// Store the scaled recombination rate and push it to the engine.
    pub fn set_rho(&mut self, rho: f64) -> Result<()> {
        self.rho = rho;
        self.engine.set_rho(rho)
    }

    /// Restore the parameter vector captured right after construction and
    /// re-push the model so the engine observes the restored values.
    pub fn reset(&mut self) -> Result<()> {
        self.model.x_mut().copy_from_slice(&self.init_x);
        self.engine.set_model(&self.model)
    }

    pub fn model(&self) -> &DemographicModel {
        &self.model
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    pub fn n(&self) -> u32 {
        self.n
    }

    pub fn n0(&self) -> f64 {
        self.n0
    }

    pub fn sfs(&self) -> &Array2<f64> {
        &self.sfs
    }

    pub fn hidden_states(&self) -> &[f64] {
        &self.hidden_states
    }

    pub fn precond(&self) -> Vec<f64> {
        self.model.precond()
    }

    pub fn segment_summaries(&self) -> &[Vec<SegmentSummary>] {
        &self.summaries
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Regularization penalty of an arbitrary model under the configured
    /// weight and penalty function. Pure; no engine interaction.
    pub fn penalize(&self, model: &DemographicModel) -> f64 {
        pretrain::penalize(model, self.penalty, self.regularizer)
    }

    /// Verify the engine still mirrors the orchestrator's copies. The
    /// setter discipline makes divergence unreachable; a failure here
    /// means the engine implementation broke the contract.
    pub fn check_sync(&self) -> Result<()> {
        let model_ok = self
            .engine
            .model_x()
            .map(|x| x == self.model.x())
            .unwrap_or(false);
        if !model_ok {
            return Err(
                EstimateError::Sync("engine model diverged from orchestrator".into()).into(),
            );
        }
        if self.engine.theta() != Some(self.theta) {
            return Err(
                EstimateError::Sync("engine theta diverged from orchestrator".into()).into(),
            );
        }
        if self.engine.rho() != Some(self.rho) {
            return Err(EstimateError::Sync("engine rho diverged from orchestrator".into()).into());
        }
        Ok(())
    }

    pub fn q(&self) -> Result<f64> {
        self.engine.q()
    }

    pub fn e_step(&mut self) -> Result<f64> {
        self.engine.e_step()
    }

    pub fn loglik(&self) -> Result<f64> {
        self.engine.loglik()
    }

    /// Serialize the current model together with `N0`.
    pub fn dump(&self, path: &Path) -> Result<()> {
        let bundle = io::results::ResultFile {
            n0: self.n0,
            s: self.model.s().to_vec(),
            x: self.model.x().to_vec(),
        };
        io::results::save_result(path, &bundle)
    }
}
