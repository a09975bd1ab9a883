use anyhow::Result;

use crate::error::EstimateError;

/// Piecewise-constant demographic model.
///
/// Time is measured in coalescent units. The model is a step function
/// `eta(t)`: piece `i` covers a duration `s[i]` at relative size `x[i]`,
/// and `eta` extends the last piece beyond the final breakpoint. The pair
/// coalescent hazard at time `t` is `1 / eta(t)`, which makes the
/// cumulative hazard piecewise linear and lets quantiles and truncated
/// means come out in closed form per piece.
#[derive(Debug, Clone, PartialEq)]
pub struct DemographicModel {
    s: Vec<f64>,
    x: Vec<f64>,
}

impl DemographicModel {
    /// Build a model from interval durations. `exponential_pieces` extra
    /// pieces are carved geometrically out of the most recent interval to
    /// refine resolution near the present; `x` starts flat at 1.
    pub fn new(time_points: &[f64], exponential_pieces: usize) -> Result<Self> {
        if time_points.is_empty() {
            return Err(
                EstimateError::Data("model needs at least one time interval".into()).into(),
            );
        }
        for (i, s) in time_points.iter().enumerate() {
            if !s.is_finite() || *s <= 0.0 {
                return Err(EstimateError::Data(format!(
                    "time interval {i} must be a positive finite duration, got {s}"
                ))
                .into());
            }
        }
        if exponential_pieces > 32 {
            return Err(EstimateError::Data(format!(
                "exponential_pieces = {exponential_pieces} is out of range (max 32)"
            ))
            .into());
        }
        let s = refine_first_piece(time_points, exponential_pieces);
        let x = vec![1.0; s.len()];
        Ok(Self { s, x })
    }

    pub fn num_pieces(&self) -> usize {
        self.s.len()
    }

    pub fn s(&self) -> &[f64] {
        &self.s
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn x_mut(&mut self) -> &mut [f64] {
        &mut self.x
    }

    /// Cumulative breakpoints, i.e. the running sums of `s`.
    pub fn breakpoints(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.s.len());
        let mut acc = 0.0;
        for s in &self.s {
            acc += s;
            out.push(acc);
        }
        out
    }

    /// Per-parameter preconditioner: the share of total model time each
    /// piece covers. Optimizers use it to scale steps so short recent
    /// pieces are not swamped by long ancient ones.
    pub fn precond(&self) -> Vec<f64> {
        let total: f64 = self.s.iter().sum();
        self.s.iter().map(|s| s / total).collect()
    }

    /// Pair coalescent cumulative hazard `R(t) = int_0^t 1/eta`.
    pub fn cumulative_hazard(&self, t: f64) -> f64 {
        let mut acc = 0.0;
        let mut start = 0.0;
        for (i, &len) in self.s.iter().enumerate() {
            let end = start + len;
            if t <= end {
                return acc + (t - start) / self.x[i];
            }
            acc += len / self.x[i];
            start = end;
        }
        acc + (t - start) / self.x[self.x.len() - 1]
    }

    /// `P(T > t)` for the pair coalescence time under this model.
    pub fn survival(&self, t: f64) -> f64 {
        (-self.cumulative_hazard(t)).exp()
    }

    /// Duration `d` such that `R(from + d) - R(from) = target`.
    pub fn elapsed_for_hazard(&self, from: f64, target: f64) -> f64 {
        let mut left = target;
        let mut t = from;
        let mut start = 0.0;
        for (i, &len) in self.s.iter().enumerate() {
            let end = start + len;
            if t < end {
                let avail = (end - t) / self.x[i];
                if left <= avail {
                    return t + left * self.x[i] - from;
                }
                left -= avail;
                t = end;
            }
            start = end;
        }
        t + left * self.x[self.x.len() - 1] - from
    }

    /// Inverse CDF of the pair coalescence time.
    pub fn quantile(&self, p: f64) -> Result<f64> {
        if !(0.0..1.0).contains(&p) {
            return Err(EstimateError::Discretization(format!(
                "quantile probability must lie in [0, 1), got {p}"
            ))
            .into());
        }
        if p == 0.0 {
            return Ok(0.0);
        }
        Ok(self.elapsed_for_hazard(0.0, -(1.0 - p).ln()))
    }

    /// `P(lo <= T < hi)`; `hi = None` means the unbounded tail interval.
    pub fn interval_mass(&self, lo: f64, hi: Option<f64>) -> f64 {
        let upper = match hi {
            Some(h) => self.survival(h),
            None => 0.0,
        };
        (self.survival(lo) - upper).max(0.0)
    }

    /// `E[T | lo <= T < hi]`. Falls back to `lo` when the interval carries
    /// no probability mass.
    pub fn interval_mean(&self, lo: f64, hi: Option<f64>) -> f64 {
        let mut mass = 0.0;
        let mut moment = 0.0;
        let mut t = lo;
        let mut r = self.cumulative_hazard(lo);
        let mut start = 0.0;
        let mut done = false;
        for (i, &len) in self.s.iter().enumerate() {
            let end = start + len;
            if t < end {
                let seg_end = match hi {
                    Some(h) => h.min(end),
                    None => end,
                };
                if seg_end > t {
                    let c = 1.0 / self.x[i];
                    let (m, mo) = truncated_moments(t, seg_end - t, c, r);
                    mass += m;
                    moment += mo;
                    r += c * (seg_end - t);
                    t = seg_end;
                }
                if let Some(h) = hi {
                    if t >= h {
                        done = true;
                        break;
                    }
                }
            }
            start = end;
        }
        if !done {
            let c = 1.0 / self.x[self.x.len() - 1];
            match hi {
                None => {
                    let sa = (-r).exp();
                    mass += sa;
                    moment += sa * (t + 1.0 / c);
                }
                Some(h) if h > t => {
                    let (m, mo) = truncated_moments(t, h - t, c, r);
                    mass += m;
                    moment += mo;
                }
                Some(_) => {}
            }
        }
        if mass <= 0.0 { lo } else { moment / mass }
    }
}

/// Mass and first moment of `T` over `[t, t + l)` given constant hazard `c`
/// and accumulated hazard `r` at the segment start.
fn truncated_moments(t: f64, l: f64, c: f64, r: f64) -> (f64, f64) {
    let sa = (-r).exp();
    let e = (-c * l).exp();
    let mass = sa * (1.0 - e);
    let moment = sa * (t * (1.0 - e) + 1.0 / c - (l + 1.0 / c) * e);
    (mass, moment)
}

/// Log-spaced interval durations covering `(0, t_max]` with `pieces`
/// intervals, the first one ending at `t1`.
pub fn log_spaced_durations(t1: f64, t_max: f64, pieces: usize) -> Result<Vec<f64>> {
    if pieces == 0 {
        return Err(EstimateError::Data("time grid needs at least one piece".into()).into());
    }
    if !(t1 > 0.0 && t_max > t1) {
        return Err(EstimateError::Data(format!(
            "time grid requires 0 < t1 < t_max, got t1={t1}, t_max={t_max}"
        ))
        .into());
    }
    let alpha = t1;
    let beta = (1.0 + t_max / alpha).ln() / pieces as f64;
    let mut prev = 0.0;
    let mut out = Vec::with_capacity(pieces);
    for k in 1..=pieces {
        let b = alpha * ((beta * k as f64).exp() - 1.0);
        out.push(b - prev);
        prev = b;
    }
    Ok(out)
}

fn refine_first_piece(time_points: &[f64], exponential_pieces: usize) -> Vec<f64> {
    if exponential_pieces == 0 {
        return time_points.to_vec();
    }
    let parts = exponential_pieces + 1;
    let unit = time_points[0] / ((1u64 << parts) - 1) as f64;
    let mut out = Vec::with_capacity(time_points.len() + exponential_pieces);
    for p in 0..parts {
        out.push(unit * (1u64 << p) as f64);
    }
    out.extend_from_slice(&time_points[1..]);
    out
}
