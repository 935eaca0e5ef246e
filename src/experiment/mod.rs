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

//! Live experiments run against the plant: base-duty search, step response
//! capture and sensor noise profiling. All of them share the sampling
//! cadence, the setpoint error band and the cancellation discipline.

pub mod base_duty;
pub mod noise_profile;
pub mod step_trigger;

use crate::config::Config;
use crate::error::{self, ErrorKind};
use crate::hal::{Duty, Hal};
use crate::halt;

use futures::future::{self, Either};
use futures::pin_mut;
use log::*;

use std::time::Duration;

/// One recorded observation. Wall time is synthetic:
/// `t = t_index * poll_interval_s`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub t_index: u32,
    pub temp_c: f64,
    pub pwm: Duty,
}

/// Recorded step response, insertion-ordered with strictly monotone
/// `t_index`, spanning the pre-step baseline through the post-step settle.
#[derive(Debug, Clone, Default)]
pub struct StepResponse {
    pub samples: Vec<Sample>,
    pub start_duty: Duty,
    pub end_duty: Duty,
}

/// Symmetric tolerance around the truncated setpoint used for convergence
/// and pre-step readiness: the sensor cannot witness errors below its
/// accuracy or its quantization noise, and the operator may widen it.
pub fn error_band(config: &Config) -> f64 {
    let quant_floor = config.temp.q_step_c() / 12f64.sqrt();
    config
        .temp
        .accuracy_c()
        .max(quant_floor)
        .max(config.basic.steady_setpoint_band)
}

/// Starting duty for experiments: the highest per-fan minimum, so every
/// fan in the group is actually spinning.
pub fn initial_duty(config: &Config) -> Duty {
    let raw = config
        .fans
        .iter()
        .map(|fan| fan.min_duty)
        .max()
        .unwrap_or(0);
    Duty::new(raw)
}

/// Inter-sample wait, select-ed against the halt condition
pub(crate) async fn sleep_or_halt(
    hal: &dyn Hal,
    halt: &mut halt::Receiver,
    seconds: u64,
) -> error::Result<()> {
    let sleep = hal.sleep(Duration::from_secs(seconds));
    let halted = halt.wait_for_halt();
    pin_mut!(sleep);
    pin_mut!(halted);
    match future::select(sleep, halted).await {
        Either::Left(_) => Ok(()),
        Either::Right(_) => Err(ErrorKind::Cancelled.into()),
    }
}

/// Temperature reads with the degraded-hardware policy: a failed or
/// non-finite read yields the last known value (0.0 before any success)
/// and is logged at the collaborator's expense.
pub(crate) struct TempReader {
    last_known: f64,
}

impl TempReader {
    pub fn new() -> Self {
        Self { last_known: 0.0 }
    }

    pub async fn read(&mut self, hal: &dyn Hal) -> f64 {
        match hal.read_temp().await {
            Ok(value) if value.is_finite() => {
                self.last_known = value;
                value
            }
            Ok(value) => {
                warn!("Unusable temperature reading {}, keeping last known", value);
                self.last_known
            }
            Err(e) => {
                warn!("Temperature read failed: {}, keeping last known", e);
                self.last_known
            }
        }
    }
}

/// PWM writes that log failures but keep the experiment running
pub(crate) async fn apply_duty(hal: &dyn Hal, duty: Duty) {
    if let Err(e) = hal.write_pwm_all(duty).await {
        warn!("PWM write of duty {} failed: {}", duty, e);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config;

    fn config_with_band(accuracy: f64, q_step: f64, extra: f64) -> Config {
        Config {
            basic: config::BasicConfig {
                steady_setpoint_band: extra,
                ..Default::default()
            },
            temp: config::TempSensorConfig {
                name: "T".to_string(),
                input: "/t".to_string(),
                setpoint: 70.0,
                sensor_type: None,
                q_step_c: Some(q_step),
                accuracy_c: Some(accuracy),
            },
            fans: vec![
                config::FanChannel {
                    name: "F0".to_string(),
                    input: "/p0".to_string(),
                    min_duty: 30,
                    max_duty: 255,
                },
                config::FanChannel {
                    name: "F1".to_string(),
                    input: "/p1".to_string(),
                    min_duty: 51,
                    max_duty: 255,
                },
            ],
            base_duty: None,
            step_trigger: None,
            noise_profile: None,
            fopdt: config::FopdtConfig {
                epsilon_factors: vec![1.0],
                refine_least_squares: false,
                log_path: None,
            },
            imc: None,
        }
    }

    #[test]
    fn test_error_band_accuracy_dominates() {
        let config = config_with_band(0.5, 0.0625, 0.0);
        // quant floor 0.018 << accuracy
        assert_eq!(error_band(&config), 0.5);
    }

    #[test]
    fn test_error_band_quant_floor_dominates() {
        let config = config_with_band(0.0, 1.0, 0.0);
        let expected = 1.0 / 12f64.sqrt();
        assert!((error_band(&config) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_error_band_extra_band_dominates() {
        let config = config_with_band(0.5, 0.0625, 1.5);
        assert_eq!(error_band(&config), 1.5);
    }

    #[test]
    fn test_initial_duty_max_of_minimums() {
        let config = config_with_band(0.5, 0.0625, 0.0);
        assert_eq!(initial_duty(&config), Duty::new(51));
    }
}
