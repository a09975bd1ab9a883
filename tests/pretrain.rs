use smc_rs::model::DemographicModel;
use smc_rs::opt::Bounds;
use smc_rs::pretrain::{expected_spectrum, penalize, pretrain, Regularizer};
use smc_rs::EstimateError;

fn approx_eq(a: f64, b: f64, eps: f64) {
    assert!(
        (a - b).abs() <= eps,
        "expected {a} ~= {b} within eps={eps}, got diff={}",
        (a - b).abs()
    );
}

#[test]
fn flat_model_carries_no_penalty() {
    let model = DemographicModel::new(&[0.5, 0.5, 0.5], 0).expect("model init failed");
    assert_eq!(penalize(&model, 1.0, Regularizer::Quadratic), 0.0);
    assert_eq!(penalize(&model, 1.0, Regularizer::Abs), 0.0);
}

#[test]
fn penalty_grows_with_log_size_jumps() {
    let mut model = DemographicModel::new(&[0.5, 0.5], 0).expect("model init failed");
    model.x_mut()[1] = std::f64::consts::E;
    approx_eq(penalize(&model, 2.0, Regularizer::Quadratic), 2.0, 1e-12);
    approx_eq(penalize(&model, 2.0, Regularizer::Abs), 2.0, 1e-12);
}

#[test]
fn expected_spectrum_is_a_distribution() {
    let model = DemographicModel::new(&[0.5, 1.5], 0).expect("model init failed");
    let sfs = expected_spectrum(&model, 4, 0.01).expect("expected spectrum failed");
    assert_eq!(sfs.dim(), (3, 3));
    let total: f64 = sfs.iter().sum();
    approx_eq(total, 1.0, 1e-9);
    for v in sfs.iter() {
        assert!(*v >= 0.0, "spectrum entry went negative: {v}");
    }
    // low theta keeps almost all mass monomorphic
    assert!(sfs[(0, 0)] > 0.9);
}

#[test]
fn pair_only_sample_puts_segregating_mass_on_the_het_class() {
    let model = DemographicModel::new(&[1.0], 0).expect("model init failed");
    let sfs = expected_spectrum(&model, 2, 0.05).expect("expected spectrum failed");
    assert_eq!(sfs.dim(), (3, 1));
    assert!(sfs[(1, 0)] > 0.0);
    approx_eq(sfs[(0, 0)] + sfs[(1, 0)], 1.0, 1e-9);
    assert_eq!(sfs[(2, 0)], 0.0);
}

#[test]
fn pretrain_at_the_optimum_returns_the_generating_scale() {
    let truth = DemographicModel::new(&[0.5, 0.5], 0).expect("model init failed");
    let sfs = expected_spectrum(&truth, 4, 2e-4).expect("expected spectrum failed");

    let mut model = DemographicModel::new(&[0.5, 0.5], 0).expect("model init failed");
    let bounds = vec![Bounds { lo: 0.1, hi: 10.0 }; 2];
    let theta_hat = pretrain(&mut model, &sfs, &bounds, 2e-4, |_| 0.0)
        .expect("pretraining failed");

    approx_eq(theta_hat, 2e-4, 2e-4 * 1e-2);
    for x in model.x() {
        assert!((0.1..=10.0).contains(x), "fitted size {x} left its bounds");
    }
}

#[test]
fn mismatched_bounds_are_a_bounds_error() {
    let truth = DemographicModel::new(&[0.5, 0.5], 0).expect("model init failed");
    let sfs = expected_spectrum(&truth, 4, 2e-4).expect("expected spectrum failed");

    let mut model = DemographicModel::new(&[0.5, 0.5], 0).expect("model init failed");
    let bounds = vec![Bounds { lo: 0.1, hi: 10.0 }; 3];
    let err = pretrain(&mut model, &sfs, &bounds, 2e-4, |_| 0.0)
        .expect_err("expected bounds error");
    match err.downcast_ref::<EstimateError>() {
        Some(EstimateError::Bounds(_)) => {}
        other => panic!("expected a bounds error, got {other:?}"),
    }
}
