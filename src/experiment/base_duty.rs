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

//! Base-duty search: a dead-zone P-type walk over raw PWM that looks for
//! the duty holding the truncated temperature at the setpoint.
//!
//! No integral term, so no windup to manage: outside the error band the
//! duty moves by the coarse step, inside it by the fine step, and exactly
//! on setpoint it holds. Convergence needs the detector to call the window
//! steady *and* the window mean to sit inside the band.

use super::{apply_duty, error_band, initial_duty, sleep_or_halt, TempReader};
use crate::config::Config;
use crate::error::{self, ErrorKind};
use crate::hal::{Duty, Hal};
use crate::halt;
use crate::sink::{BaseDutyRecord, Sink};
use crate::steady::SteadyStateDetector;
use crate::utils::truncate_decimals;

use log::*;

/// Search result. `duty` is applied to the hardware on exit either way.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseDutyOutcome {
    pub duty: Duty,
    pub converged: bool,
    pub iterations: u32,
}

pub async fn run(
    config: &Config,
    hal: &dyn Hal,
    sink: &dyn Sink,
    halt: &mut halt::Receiver,
) -> error::Result<BaseDutyOutcome> {
    let tuning = config
        .base_duty
        .as_ref()
        .ok_or_else(|| ErrorKind::Config("base_duty section missing".to_string()))?;

    let decimals = config.basic.truncate_decimals;
    let setpoint = truncate_decimals(config.temp.setpoint, decimals);
    let band = error_band(config);
    let step_outside = i32::from(tuning.step_outside_tol);
    let step_inside = i32::from(tuning.step_inside_tol);

    let mut detector = SteadyStateDetector::from_config(config);
    let mut reader = TempReader::new();

    let mut duty = initial_duty(config);
    let mut best_duty = duty;
    let mut best_err = f64::INFINITY;

    info!(
        "BaseDuty: setpoint={} band={} start duty={}",
        setpoint, band, duty
    );

    let mut iter = 0;
    while iter < config.basic.max_iterations {
        if halt.is_halted() {
            return Err(ErrorKind::Cancelled.into());
        }
        apply_duty(hal, duty).await;
        sleep_or_halt(hal, halt, config.basic.poll_interval_s).await?;

        let temp = truncate_decimals(reader.read(hal).await, decimals);
        if halt.is_halted() {
            return Err(ErrorKind::Cancelled.into());
        }

        // Track the best duty by absolute truncated error vs setpoint, in
        // case the loop runs out of iterations.
        let abs_err = (temp - setpoint).abs();
        if abs_err < best_err {
            best_err = abs_err;
            best_duty = duty;
        }

        detector.push(temp);

        // Stream progress before the next sample is read
        let record = BaseDutyRecord {
            iter,
            duty: duty.raw(),
            temp_truncated: temp,
        };
        if let Err(e) = sink.base_duty(&record) {
            warn!("BaseDuty: progress record dropped: {}", e);
        }

        // Convergence requires BOTH: steady by slope+RMSE, and the window
        // mean within setpoint ± band.
        let stats = detector.stats();
        let mean_near_setpoint =
            stats.n >= detector.window() && (stats.mean - setpoint).abs() <= band;
        if detector.is_steady() && mean_near_setpoint {
            info!("BaseDuty: converged at duty={} after {} iterations", duty, iter);
            return Ok(BaseDutyOutcome {
                duty,
                converged: true,
                iterations: iter,
            });
        }

        // Dead-zone update; higher duty cools, so hotter raises duty
        let step = if abs_err > band {
            step_outside
        } else if abs_err > 0.0 {
            step_inside
        } else {
            0
        };
        if step != 0 {
            duty = if temp > setpoint {
                duty.offset(step)
            } else {
                duty.offset(-step)
            };
        }

        iter += 1;
    }

    warn!(
        "BaseDuty: {}; applying closest duty={} (|err|={})",
        ErrorKind::NoConvergence(config.basic.max_iterations),
        best_duty,
        best_err
    );
    if !halt.is_halted() {
        apply_duty(hal, best_duty).await;
    }
    Ok(BaseDutyOutcome {
        duty: best_duty,
        converged: false,
        iterations: iter,
    })
}
