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

//! Internal Model Control tuning (Rivera 1986) of an identified FOPDT
//! model.
//!
//! Each requested epsilon factor yields two rows: the PID rule (table row
//! 1) and the Improved PI rule (table row 3). The closed-loop time
//! constant is `epsilon = theta * factor`; a dead-time-free model gets a
//! 0.1 s theta floor for the epsilon computation only, which keeps the
//! row formulas exact in theta and makes the reported ratio the "no dead
//! time" sentinel.

use crate::fopdt::FopdtParams;

/// Below this, dead time counts as absent
const THETA_EPSILON: f64 = 1e-6;

/// Stand-in dead time used to derive epsilon for a dead-time-free model
const THETA_FLOOR_S: f64 = 0.1;

/// Integral/derivative times below this produce zero gain instead of
/// blowing up
const TIME_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Which IMC table row produced a gain set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningRule {
    Pid,
    ImprovedPi,
}

impl TuningRule {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pid => "PID",
            Self::ImprovedPi => "Improved PI",
        }
    }
}

/// One tuned row; the output carries two per input factor, in input order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImcResult {
    pub epsilon: f64,
    pub ratio: f64,
    pub rule: TuningRule,
    pub gains: PidGains,
}

/// Map controller form `K_c`, `T_I`, `T_D` to parallel gains
fn to_gains(kc: f64, ti: f64, td: f64) -> PidGains {
    PidGains {
        kp: kc,
        ki: if ti.abs() < TIME_EPSILON { 0.0 } else { kc / ti },
        kd: kc * td,
    }
}

fn pid_row(params: &FopdtParams, epsilon: f64) -> PidGains {
    let FopdtParams { k, tau, theta } = *params;
    let denominator = k * (2.0 * epsilon + theta);
    if denominator.abs() < TIME_EPSILON {
        return PidGains {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
        };
    }
    let kc = (2.0 * tau + theta) / denominator;
    let ti = tau + theta / 2.0;
    let td = (tau * theta) / (2.0 * tau + theta);
    to_gains(kc, ti, td)
}

fn improved_pi_row(params: &FopdtParams, epsilon: f64) -> PidGains {
    let FopdtParams { k, tau, theta } = *params;
    let denominator = k * 2.0 * epsilon;
    if denominator.abs() < TIME_EPSILON {
        return PidGains {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
        };
    }
    let kc = (2.0 * tau + theta) / denominator;
    let ti = tau + theta / 2.0;
    to_gains(kc, ti, 0.0)
}

/// Tune one gain pair per factor, preserving input factor order
pub fn tune(params: &FopdtParams, epsilon_factors: &[f64]) -> Vec<ImcResult> {
    let theta_for_epsilon = if params.theta < THETA_EPSILON {
        THETA_FLOOR_S
    } else {
        params.theta
    };

    let mut results = Vec::with_capacity(epsilon_factors.len() * 2);
    for &factor in epsilon_factors.iter() {
        let epsilon = theta_for_epsilon * factor;
        let ratio = epsilon / params.theta.max(THETA_EPSILON);
        results.push(ImcResult {
            epsilon,
            ratio,
            rule: TuningRule::Pid,
            gains: pid_row(params, epsilon),
        });
        results.push(ImcResult {
            epsilon,
            ratio,
            rule: TuningRule::ImprovedPi,
            gains: improved_pi_row(params, epsilon),
        });
    }
    results
}
