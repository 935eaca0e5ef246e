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

//! Step-response capture.
//!
//! Holds the start duty until the plant is steady near the setpoint, kicks
//! the duty by the configured offset, and keeps sampling until the plant is
//! steady again at wherever it lands. Every sample from the first
//! post-apply read is recorded, through the step boundary, so the
//! identifier sees the baseline, the step time, and the approach to the new
//! steady state.

use super::{apply_duty, error_band, sleep_or_halt, Sample, StepResponse, TempReader};
use crate::config::Config;
use crate::error::{self, ErrorKind};
use crate::hal::{Duty, Hal};
use crate::halt;
use crate::sink::{Sink, StepRecord};
use crate::steady::SteadyStateDetector;
use crate::utils::truncate_decimals;

use log::*;

pub async fn run(
    config: &Config,
    hal: &dyn Hal,
    sink: &dyn Sink,
    halt: &mut halt::Receiver,
    start_duty: Duty,
) -> error::Result<StepResponse> {
    let trigger = config
        .step_trigger
        .as_ref()
        .ok_or_else(|| ErrorKind::Config("step_trigger section missing".to_string()))?;

    let decimals = config.basic.truncate_decimals;
    let setpoint = truncate_decimals(config.temp.setpoint, decimals);
    let band = error_band(config);

    let mut detector = SteadyStateDetector::from_config(config);
    let mut reader = TempReader::new();

    let mut pwm = start_duty;
    apply_duty(hal, pwm).await;

    info!(
        "StepTrigger: start duty={} step={} setpoint={}",
        start_duty, trigger.step_duty, setpoint
    );

    let mut response = StepResponse {
        samples: Vec::new(),
        start_duty,
        end_duty: pwm,
    };
    let mut jumped = false;

    let mut i = 0;
    while i < config.basic.max_iterations {
        sleep_or_halt(hal, halt, config.basic.poll_interval_s).await?;

        let temp = truncate_decimals(reader.read(hal).await, decimals);
        if halt.is_halted() {
            return Err(ErrorKind::Cancelled.into());
        }

        response.samples.push(Sample {
            t_index: i,
            temp_c: temp,
            pwm,
        });
        detector.push(temp);

        let stats = detector.stats();
        let record = StepRecord {
            t_index: i,
            temp_truncated: temp,
            pwm: pwm.raw(),
            slope: stats.slope,
            rmse: stats.rmse,
            n: stats.n,
            mean: stats.mean,
        };
        if let Err(e) = sink.step(&record) {
            warn!("StepTrigger: progress record dropped: {}", e);
        }

        if !jumped {
            // Pre-step gate: steady AND mean near setpoint
            let mean_near_setpoint =
                stats.n >= detector.window() && (stats.mean - setpoint).abs() <= band;
            if detector.is_steady() && mean_near_setpoint {
                pwm = start_duty.offset(trigger.step_duty);
                if halt.is_halted() {
                    return Err(ErrorKind::Cancelled.into());
                }
                apply_duty(hal, pwm).await;

                // Post-step settling is judged on a fresh window
                detector.reset();
                jumped = true;
                info!("StepTrigger: step applied, duty {} -> {}", start_duty, pwm);
            }
        } else {
            // Post-step gate: steady only, the mean may sit anywhere
            if detector.is_steady() {
                info!("StepTrigger: settled after {} samples", response.samples.len());
                break;
            }
        }

        i += 1;
    }

    if i >= config.basic.max_iterations {
        warn!(
            "StepTrigger: iteration bound {} reached, returning partial capture",
            config.basic.max_iterations
        );
    }

    response.end_duty = response
        .samples
        .last()
        .map(|sample| sample.pwm)
        .unwrap_or(pwm);
    Ok(response)
}
