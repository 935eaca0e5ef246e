// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! First-order-plus-dead-time identification from a recorded step
//! response: `Y(s)/U(s) = k * e^(-theta*s) / (tau*s + 1)`.
//!
//! The required path is the deterministic two-point method on the 28.3 %
//! and 63.2 % response crossings, with sub-sample linear interpolation. An
//! optional least-squares pass regresses `-ln(1 - f)` against time to
//! refine `tau`/`theta` on clean data.

use crate::experiment::StepResponse;
use crate::error::{self, ErrorKind};
use crate::utils::pwm_to_percent;

use log::*;

/// Identification needs a visible baseline plus a tail; fewer samples than
/// this cannot carry a usable step.
const MIN_SAMPLES: usize = 8;

/// Fraction thresholds of the two-point method
const F_LOW: f64 = 0.283;
const F_HIGH: f64 = 0.632;

/// Identified process parameters. `k` is °C per percent duty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FopdtParams {
    pub k: f64,
    pub tau: f64,
    pub theta: f64,
}

/// Identify FOPDT parameters from a step response sampled every `dt_s`
/// seconds.
pub fn identify(response: &StepResponse, dt_s: f64) -> error::Result<FopdtParams> {
    let samples = &response.samples;
    if samples.len() < MIN_SAMPLES {
        debug!("FOPDT: only {} samples, no usable step", samples.len());
        Err(ErrorKind::NoStep)?;
    }

    // Locate the step: first sample whose pwm differs from the start. The
    // boundary time t0 belongs to the previous sample.
    let u0 = samples[0].pwm;
    let step_index = samples
        .iter()
        .position(|sample| sample.pwm != u0)
        .ok_or_else(|| error::Error::from(ErrorKind::NoStep))?;
    let u1 = samples[step_index].pwm;
    let t0 = f64::from(samples[step_index - 1].t_index) * dt_s;

    // Gain from the percent duty change and the settled output change; the
    // tail quarter (at least 4 samples) stands in for steady state.
    let du_pct = pwm_to_percent(u1.raw()) - pwm_to_percent(u0.raw());
    let y0 = samples[0].temp_c;
    let tail = samples.len() - (samples.len() / 4).max(4);
    let y_ss = samples[tail..]
        .iter()
        .map(|sample| sample.temp_c)
        .sum::<f64>()
        / (samples.len() - tail) as f64;
    let dy = y_ss - y0;

    if du_pct.abs() < 1e-6 || dy.abs() < 1e-6 {
        Err(ErrorKind::NoChange)?;
    }
    let k = dy / du_pct;

    // Normalized response and its threshold crossings, interpolated
    // between samples for sub-sample resolution on coarse grids.
    let f: Vec<(f64, f64)> = samples
        .iter()
        .map(|sample| {
            let t = f64::from(sample.t_index) * dt_s;
            (t, (sample.temp_c - y0) / dy)
        })
        .collect();

    let t_low = crossing_after(&f, t0, F_LOW).ok_or_else(invalid_tau)?;
    let t_high = crossing_after(&f, t0, F_HIGH).ok_or_else(invalid_tau)?;

    let tau = 1.494 * (t_high - t_low);
    if tau <= 0.0 {
        Err(ErrorKind::InvalidTau)?;
    }
    let theta = ((t_low - t0) - 0.333 * tau).max(0.0);

    Ok(FopdtParams { k, tau, theta })
}

fn invalid_tau() -> error::Error {
    ErrorKind::InvalidTau.into()
}

/// Earliest time after `t0` at which the normalized response crosses
/// `level`, linearly interpolated between samples
fn crossing_after(f: &[(f64, f64)], t0: f64, level: f64) -> Option<f64> {
    for pair in f.windows(2) {
        let (t_prev, f_prev) = pair[0];
        let (t_next, f_next) = pair[1];
        if t_next <= t0 {
            continue;
        }
        if f_next >= level {
            if f_prev >= level || (f_next - f_prev).abs() < 1e-12 {
                // already above at the window start, or a flat segment
                return Some(t_next.max(t0));
            }
            let t = t_prev + (level - f_prev) / (f_next - f_prev) * (t_next - t_prev);
            return Some(t.max(t0));
        }
    }
    None
}

/// Refine `tau`/`theta` by regressing `-ln(1 - f)` against `t - t0` over
/// the mid-response (`0.1 < f < 0.9`). Falls back to the two-point result
/// when the regression is degenerate or lands outside the model domain.
pub fn refine_least_squares(
    response: &StepResponse,
    dt_s: f64,
    two_point: FopdtParams,
) -> FopdtParams {
    let samples = &response.samples;
    if samples.len() < MIN_SAMPLES {
        return two_point;
    }
    let u0 = samples[0].pwm;
    let step_index = match samples.iter().position(|sample| sample.pwm != u0) {
        Some(index) => index,
        None => return two_point,
    };
    let t0 = f64::from(samples[step_index - 1].t_index) * dt_s;

    let y0 = samples[0].temp_c;
    let tail = samples.len() - (samples.len() / 4).max(4);
    let y_ss = samples[tail..]
        .iter()
        .map(|sample| sample.temp_c)
        .sum::<f64>()
        / (samples.len() - tail) as f64;
    let dy = y_ss - y0;

    let mut xs = Vec::new();
    let mut zs = Vec::new();
    for sample in samples.iter() {
        let t = f64::from(sample.t_index) * dt_s;
        if t <= t0 {
            continue;
        }
        let f = (sample.temp_c - y0) / dy;
        if f > 0.1 && f < 0.9 {
            xs.push(t - t0);
            zs.push(-(1.0 - f).ln());
        }
    }

    let (slope, intercept) = match solve_linear_regression(&xs, &zs) {
        Some(solution) => solution,
        None => return two_point,
    };
    if slope <= 0.0 {
        return two_point;
    }

    // z = (t - t0)/tau - theta/tau
    let tau = 1.0 / slope;
    let theta = -intercept / slope;
    if tau > 0.0 && theta >= 0.0 {
        debug!(
            "FOPDT refine: tau {} -> {}, theta {} -> {}",
            two_point.tau, tau, two_point.theta, theta
        );
        FopdtParams {
            k: two_point.k,
            tau,
            theta,
        }
    } else {
        two_point
    }
}

/// Simple linear regression `y = slope * x + intercept`
fn solve_linear_regression(xs: &[f64], ys: &[f64]) -> Option<(f64, f64)> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let n = xs.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }
    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < 1e-9 {
        return None;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    Some((slope, intercept))
}
