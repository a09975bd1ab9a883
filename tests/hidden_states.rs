use smc_rs::engine::{balance_hidden_states, merge_hidden_states};
use smc_rs::model::DemographicModel;
use smc_rs::EstimateError;

fn approx_eq(a: f64, b: f64, eps: f64) {
    assert!(
        (a - b).abs() <= eps,
        "expected {a} ~= {b} within eps={eps}, got diff={}",
        (a - b).abs()
    );
}

#[test]
fn balanced_states_are_coalescent_quantiles() {
    // flat model: quantile(p) = -ln(1 - p)
    let model = DemographicModel::new(&[0.5, 0.5, 0.5, 0.5], 0).expect("model init failed");
    let hs = balance_hidden_states(&model, 4).expect("balancing failed");

    assert_eq!(hs.len(), 5);
    assert_eq!(hs[0], 0.0);
    approx_eq(hs[1], -(1.0f64 - 0.25).ln(), 1e-12);
    approx_eq(hs[2], -(1.0f64 - 0.5).ln(), 1e-12);
    approx_eq(hs[3], -(1.0f64 - 0.75).ln(), 1e-12);
    for w in hs.windows(2) {
        assert!(w[1] > w[0], "reference points must increase");
    }
}

#[test]
fn merge_keeps_breakpoints_below_first_reference_point() {
    let model = DemographicModel::new(&[0.1, 0.2, 0.4, 0.8], 0).expect("model init failed");
    let hs = balance_hidden_states(&model, 2).expect("balancing failed");
    let merged = merge_hidden_states(&model, &hs).expect("merge failed");

    assert_eq!(merged[0], 0.0);
    for w in merged.windows(2) {
        assert!(w[1] > w[0], "hidden states must be strictly increasing");
    }
    let bound = hs[1];
    for c in model.breakpoints() {
        if c <= bound {
            assert!(
                merged.iter().any(|h| (h - c).abs() <= 1e-12),
                "breakpoint {c} below bound {bound} missing from hidden states"
            );
        }
    }
    // everything from the balancer survives the merge
    for h in &hs {
        assert!(merged.iter().any(|m| (m - h).abs() <= 1e-12));
    }
}

#[test]
fn merge_degenerates_to_reference_points() {
    // single ancient piece: the only breakpoint lies beyond the bound
    let model = DemographicModel::new(&[20.0], 0).expect("model init failed");
    let hs = balance_hidden_states(&model, 1).expect("balancing failed");
    assert_eq!(hs.len(), 2);
    assert!(model.breakpoints()[0] > hs[1]);

    let merged = merge_hidden_states(&model, &hs).expect("merge failed");
    assert_eq!(merged, hs);
}

#[test]
fn zero_intervals_is_a_discretization_error() {
    let model = DemographicModel::new(&[0.5], 0).expect("model init failed");
    let err = balance_hidden_states(&model, 0).expect_err("expected discretization error");
    match err.downcast_ref::<EstimateError>() {
        Some(EstimateError::Discretization(_)) => {}
        other => panic!("expected a discretization error, got {other:?}"),
    }
}

#[test]
fn merge_rejects_degenerate_reference_points() {
    let model = DemographicModel::new(&[0.5], 0).expect("model init failed");
    let err = merge_hidden_states(&model, &[0.0]).expect_err("expected discretization error");
    assert!(format!("{err:#}").contains("at least two"));
}
