use smc_rs::data::SpanRecord;
use smc_rs::engine::{balance_hidden_states, merge_hidden_states, HmmEngine, InferenceEngine};
use smc_rs::model::DemographicModel;

fn approx_eq(a: f64, b: f64, eps: f64) {
    assert!(
        (a - b).abs() <= eps,
        "expected {a} ~= {b} within eps={eps}, got diff={}",
        (a - b).abs()
    );
}

fn rec(span: u64, a: i8, b: u32, nb: u32) -> SpanRecord {
    SpanRecord::new(span, a, b, nb)
}

fn ready_engine(dataset: &[Vec<SpanRecord>]) -> HmmEngine {
    let model = DemographicModel::new(&[0.5, 0.5, 1.0], 0).expect("model init failed");
    let hs = balance_hidden_states(&model, 4).expect("balancing failed");
    let hs = merge_hidden_states(&model, &hs).expect("merge failed");
    let mut engine = HmmEngine::new(1, dataset, &hs).expect("engine init failed");
    engine.set_theta(0.05).expect("set_theta failed");
    engine.set_rho(0.01).expect("set_rho failed");
    engine.set_model(&model).expect("set_model failed");
    engine
}

#[test]
fn e_step_produces_finite_statistics() {
    let dataset = vec![vec![
        rec(5, 0, 0, 1),
        rec(1, 1, 0, 1),
        rec(3, 0, 1, 1),
        rec(2, -1, 0, 0),
        rec(4, 0, 0, 1),
    ]];
    let mut engine = ready_engine(&dataset);

    let ll = engine.e_step().expect("e-step failed");
    assert!(ll.is_finite() && ll < 0.0, "loglik should be finite and negative, got {ll}");
    approx_eq(engine.loglik().expect("loglik failed"), ll, 0.0);

    let q = engine.q().expect("q failed");
    assert!(q.is_finite(), "q should be finite, got {q}");
    // the complete-data expectation can never beat the marginal likelihood
    assert!(q <= ll + 1e-9, "expected q <= loglik, got q={q}, loglik={ll}");

    // same parameters, same answer
    let ll2 = engine.e_step().expect("second e-step failed");
    approx_eq(ll2, ll, 1e-9);
}

#[test]
fn all_missing_sequence_has_zero_loglik() {
    // emissions are 1 for missing sites, so only normalization remains
    let dataset = vec![vec![rec(10, -1, 0, 0)]];
    let mut engine = ready_engine(&dataset);
    let ll = engine.e_step().expect("e-step failed");
    approx_eq(ll, 0.0, 1e-9);
}

#[test]
fn multiple_sequences_are_independent_chains() {
    let joint = vec![vec![rec(4, 0, 0, 1)], vec![rec(6, 1, 0, 1)]];
    let mut engine = ready_engine(&joint);
    let ll_joint = engine.e_step().expect("e-step failed");

    let mut first = ready_engine(&[vec![rec(4, 0, 0, 1)]]);
    let mut second = ready_engine(&[vec![rec(6, 1, 0, 1)]]);
    let ll_split =
        first.e_step().expect("e-step failed") + second.e_step().expect("e-step failed");
    approx_eq(ll_joint, ll_split, 1e-9);
}

#[test]
fn computation_before_parameters_errors() {
    let model = DemographicModel::new(&[0.5, 0.5], 0).expect("model init failed");
    let hs = balance_hidden_states(&model, 3).expect("balancing failed");
    let mut engine =
        HmmEngine::new(1, &[vec![rec(5, 0, 0, 1)]], &hs).expect("engine init failed");
    let err = engine.e_step().expect_err("expected unset-parameter error");
    assert!(format!("{err:#}").contains("not fully set"));
}

#[test]
fn loglik_before_e_step_errors() {
    let dataset = vec![vec![rec(5, 0, 0, 1)]];
    let engine = ready_engine(&dataset);
    let err = engine.loglik().expect_err("expected missing E-step error");
    assert!(format!("{err:#}").contains("E-step"));
}

#[test]
fn non_positive_rates_are_rejected() {
    let dataset = vec![vec![rec(5, 0, 0, 1)]];
    let mut engine = ready_engine(&dataset);
    let err = engine.set_theta(-1.0).expect_err("expected invalid theta error");
    assert!(format!("{err:#}").contains("positive"));
}

#[test]
fn panel_larger_than_engine_classes_is_rejected() {
    let model = DemographicModel::new(&[0.5], 0).expect("model init failed");
    let hs = balance_hidden_states(&model, 2).expect("balancing failed");
    let err = HmmEngine::new(1, &[vec![rec(5, 0, 2, 2)]], &hs)
        .expect_err("expected panel-size error");
    assert!(format!("{err:#}").contains("exceeds engine classes"));
}
