use anyhow::Result;

use crate::error::EstimateError;
use crate::utils::{logit, sigmoid};

/// Inclusive box constraint for one parameter.
#[derive(Debug, Clone, Copy)]
pub struct Bounds {
    pub lo: f64,
    pub hi: f64,
}

#[derive(Debug, Clone)]
pub struct OptConfig {
    pub max_iters: usize,
    pub lbfgs_m: usize,
    pub grad_eps: f64,
    pub line_search_c1: f64,
    pub max_ls_steps: usize,
    pub tol_grad: f64,
}

impl Default for OptConfig {
    fn default() -> Self {
        Self {
            max_iters: 30,
            lbfgs_m: 7,
            grad_eps: 1e-4,
            line_search_c1: 1e-4,
            max_ls_steps: 20,
            tol_grad: 1e-4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub converged: bool,
}

fn to_unconstrained(params: &[f64], bounds: &[Bounds]) -> Vec<f64> {
    params
        .iter()
        .zip(bounds.iter())
        .map(|(x, b)| {
            let z = (x - b.lo) / (b.hi - b.lo);
            logit(z.clamp(1e-12, 1.0 - 1e-12))
        })
        .collect()
}

fn from_unconstrained(p: &[f64], bounds: &[Bounds]) -> Vec<f64> {
    p.iter()
        .zip(bounds.iter())
        .map(|(v, b)| b.lo + (b.hi - b.lo) * sigmoid(*v))
        .collect()
}

fn numerical_grad<F>(f: &mut F, params: &[f64], eps: f64) -> Result<Vec<f64>>
where
    F: FnMut(&[f64]) -> Result<f64>,
{
    let mut grad = vec![0.0; params.len()];
    for i in 0..params.len() {
        let step = eps * params[i].abs().max(1.0);
        let mut p1 = params.to_vec();
        let mut p2 = params.to_vec();
        p1[i] += step;
        p2[i] -= step;
        grad[i] = (f(&p1)? - f(&p2)?) / (2.0 * step);
    }
    Ok(grad)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// Box-constrained L-BFGS with backtracking line search.
///
/// Parameters are mapped through a logistic transform so every cost
/// evaluation sees in-bounds values; gradients are central differences of
/// the transformed cost. `converged` is false only when the very first
/// line search fails to make progress and the initial gradient is above
/// tolerance.
pub fn minimize_bounded<F>(
    mut cost: F,
    x0: &[f64],
    bounds: &[Bounds],
    config: &OptConfig,
) -> Result<Minimum>
where
    F: FnMut(&[f64]) -> Result<f64>,
{
    if bounds.len() != x0.len() {
        return Err(EstimateError::Bounds(format!(
            "{} bounds supplied for {} parameters",
            bounds.len(),
            x0.len()
        ))
        .into());
    }
    for (i, b) in bounds.iter().enumerate() {
        if !(b.lo.is_finite() && b.hi.is_finite() && b.lo < b.hi) {
            return Err(EstimateError::Bounds(format!(
                "bound {i} is degenerate: [{}, {}]",
                b.lo, b.hi
            ))
            .into());
        }
    }

    let mut f = |p: &[f64]| -> Result<f64> { cost(&from_unconstrained(p, bounds)) };

    let mut xk = to_unconstrained(x0, bounds);
    let mut gk = numerical_grad(&mut f, &xk, config.grad_eps)?;
    let mut fk = f(&xk)?;
    let mut accepted = 0usize;

    let mut s_hist: Vec<Vec<f64>> = Vec::new();
    let mut y_hist: Vec<Vec<f64>> = Vec::new();
    let mut rho_hist: Vec<f64> = Vec::new();

    let mut grad_small = norm(&gk) < config.tol_grad;
    for _ in 0..config.max_iters {
        if norm(&gk) < config.tol_grad {
            grad_small = true;
            break;
        }

        // two-loop recursion for the search direction
        let mut q = gk.clone();
        let mut alpha = vec![0.0; s_hist.len()];
        for i in (0..s_hist.len()).rev() {
            let a = rho_hist[i] * dot(&s_hist[i], &q);
            alpha[i] = a;
            for j in 0..q.len() {
                q[j] -= a * y_hist[i][j];
            }
        }
        let mut r = if let Some(last_y) = y_hist.last() {
            let last_s = s_hist.last().unwrap();
            let ys = dot(last_y, last_s);
            let yy = dot(last_y, last_y);
            let h0 = if yy > 0.0 { ys / yy } else { 1.0 };
            q.iter().map(|v| v * h0).collect::<Vec<f64>>()
        } else {
            q.clone()
        };
        for i in 0..s_hist.len() {
            let beta = rho_hist[i] * dot(&y_hist[i], &r);
            for j in 0..r.len() {
                r[j] += s_hist[i][j] * (alpha[i] - beta);
            }
        }
        for v in r.iter_mut() {
            *v = -*v;
        }

        let gdotp = dot(&gk, &r);
        let mut step = 1.0;
        let mut x_new = xk.clone();
        let mut f_new = fk;
        let mut ls_ok = false;
        for _ in 0..config.max_ls_steps {
            for i in 0..xk.len() {
                x_new[i] = xk[i] + step * r[i];
            }
            f_new = f(&x_new)?;
            if f_new <= fk + config.line_search_c1 * step * gdotp {
                ls_ok = true;
                break;
            }
            step *= 0.5;
        }
        if !ls_ok {
            break;
        }
        accepted += 1;

        let g_new = numerical_grad(&mut f, &x_new, config.grad_eps)?;
        let mut s = vec![0.0; xk.len()];
        let mut y = vec![0.0; xk.len()];
        for i in 0..xk.len() {
            s[i] = x_new[i] - xk[i];
            y[i] = g_new[i] - gk[i];
        }
        let ys = dot(&y, &s);
        if ys > 1e-12 {
            if s_hist.len() == config.lbfgs_m {
                s_hist.remove(0);
                y_hist.remove(0);
                rho_hist.remove(0);
            }
            s_hist.push(s);
            y_hist.push(y);
            rho_hist.push(1.0 / ys);
        }
        xk = x_new;
        gk = g_new;
        fk = f_new;
    }

    Ok(Minimum {
        x: from_unconstrained(&xk, bounds),
        value: fk,
        converged: grad_small || accepted > 0,
    })
}
