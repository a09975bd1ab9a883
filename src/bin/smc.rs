use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use smc_rs::engine::HmmEngine;
use smc_rs::estimator::{Estimator, EstimatorConfig, RunConfig};
use smc_rs::model::log_spaced_durations;
use smc_rs::opt::{minimize_bounded, Bounds, OptConfig};
use smc_rs::pretrain::Regularizer;
use smc_rs::progress;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum PenaltyKind {
    Quadratic,
    Abs,
}

#[derive(Parser, Debug)]
#[command(name = "smc")]
#[command(about = "Demographic history estimation from genomic variation", long_about = None)]
struct Cli {
    /// Dataset files: whitespace-separated "span a b nb" rows, optionally gzipped
    #[arg(required = true)]
    input_files: Vec<PathBuf>,
    /// Output JSON with the fitted model and N0
    #[arg(short, long)]
    output: PathBuf,
    #[arg(long, default_value_t = 10)]
    em_iters: usize,
    /// Reference population size used to scale theta and rho
    #[arg(long, default_value_t = 1e4)]
    n0: f64,
    /// Per-site mutation rate; inferred by pretraining when omitted
    #[arg(long)]
    mu: Option<f64>,
    /// Per-site recombination rate; defaults to theta/4 when omitted
    #[arg(long)]
    r: Option<f64>,
    /// Target hidden-state interval count
    #[arg(long, default_value_t = 32)]
    hidden_intervals: usize,
    /// End of the most recent model interval, in coalescent units
    #[arg(long, default_value_t = 0.01)]
    t1: f64,
    /// End of the model grid, in coalescent units
    #[arg(long, default_value_t = 15.0)]
    t_max: f64,
    #[arg(long, default_value_t = 16)]
    pieces: usize,
    /// Extra geometric refinement pieces in the most recent interval
    #[arg(long, default_value_t = 2)]
    exponential_pieces: usize,
    /// Keep full panel information only every this many sites
    #[arg(long)]
    thinning: Option<u64>,
    /// Missing runs at least this long split the HMM chain
    #[arg(long, default_value_t = 50_000)]
    span_cutoff: u64,
    /// Maximum single-record span fed to the engine
    #[arg(long, default_value_t = 10_000)]
    length_cutoff: u64,
    #[arg(long, default_value_t = 1e-2)]
    regularization_penalty: f64,
    #[arg(long, value_enum, default_value_t = PenaltyKind::Quadratic)]
    regularizer: PenaltyKind,
    #[arg(long)]
    no_pretrain: bool,
    /// Bounds on the relative sizes, for pretraining and the M-step
    #[arg(long, default_value_t = 1e-1)]
    x_lo: f64,
    #[arg(long, default_value_t = 1e2)]
    x_hi: f64,
    #[arg(long, default_value_t = 30)]
    mstep_iters: usize,
    #[arg(long)]
    no_progress: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let n_pieces = cli.pieces + cli.exponential_pieces;
    let config = EstimatorConfig {
        time_points: log_spaced_durations(cli.t1, cli.t_max, cli.pieces)?,
        exponential_pieces: cli.exponential_pieces,
        n0: cli.n0,
        mu: cli.mu,
        r: cli.r,
        m: cli.hidden_intervals,
        bounds: vec![
            Bounds {
                lo: cli.x_lo,
                hi: cli.x_hi,
            };
            n_pieces
        ],
        run: RunConfig {
            thinning: cli.thinning,
            regularization_penalty: cli.regularization_penalty,
            regularizer: match cli.regularizer {
                PenaltyKind::Quadratic => Regularizer::Quadratic,
                PenaltyKind::Abs => Regularizer::Abs,
            },
            no_pretrain: cli.no_pretrain,
            span_cutoff: cli.span_cutoff,
            length_cutoff: cli.length_cutoff,
        },
    };

    let mut est = if cli.no_progress {
        Estimator::<HmmEngine>::from_files(&cli.input_files, &config)?
    } else {
        let pb = progress::spinner("INIT", "Loading data and balancing hidden states");
        let est = Estimator::<HmmEngine>::from_files(&cli.input_files, &config)?;
        pb.finish_with_message("Initialization done");
        est
    };

    println!("n = {}", est.n());
    println!("hidden states: {}", est.hidden_states().len());
    println!("theta = {:.6e}, rho = {:.6e}", est.theta(), est.rho());
    for (i, file) in cli.input_files.iter().enumerate() {
        for s in &est.segment_summaries()[i] {
            println!(
                "{}: {:>8} spans {:>12} derived {:>14} total het {:.4e}",
                file.display(),
                s.spans,
                s.derived_bases,
                s.total_bases,
                s.het
            );
        }
    }

    let opt_cfg = OptConfig {
        max_iters: cli.mstep_iters,
        ..OptConfig::default()
    };
    let pb = if !cli.no_progress && cli.em_iters > 0 {
        Some(progress::bar(cli.em_iters as u64, "EM", "iterating"))
    } else {
        None
    };
    for it in 0..cli.em_iters {
        est.e_step()?;
        let loglik = est.loglik()?;
        let x0 = est.model().x().to_vec();
        let bounds = vec![
            Bounds {
                lo: cli.x_lo,
                hi: cli.x_hi,
            };
            x0.len()
        ];
        let base = est.model().clone();
        let fit = minimize_bounded(
            |xs| {
                let mut candidate = base.clone();
                candidate.x_mut().copy_from_slice(xs);
                let penalty = est.penalize(&candidate);
                est.set_model(candidate)?;
                Ok(-(est.q()?) + penalty)
            },
            &x0,
            &bounds,
            &opt_cfg,
        )?;
        let mut best = base;
        best.x_mut().copy_from_slice(&fit.x);
        est.set_model(best)?;
        match &pb {
            Some(pb) => {
                pb.set_message(format!("loglik {loglik:.4}"));
                pb.inc(1);
            }
            None => println!("iter {}: loglik {loglik:.6}", it + 1),
        }
    }
    if let Some(pb) = pb {
        pb.finish_with_message("EM done");
    }
    if cli.em_iters > 0 {
        est.e_step()?;
        println!("final loglik: {:.6}", est.loglik()?);
    }
    est.check_sync()?;

    est.dump(&cli.output)?;
    println!("results: {}", cli.output.display());
    Ok(())
}
