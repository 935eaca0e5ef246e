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

//! This module handles autotuner configuration and configuration file parsing.
//!
//! A run consumes exactly one temperature sensor and one homogeneous fan
//! group. The experiment sections are optional; a missing section skips the
//! corresponding phase (see `session`).

use crate::error::{self, ErrorKind};
use crate::sensorinfo;

use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Location of default config
pub const DEFAULT_CONFIG_PATH: &'static str = "/etc/pid-autotune/autotune.json";

/// Default sensor database location
pub const DEFAULT_SENSOR_INFO_PATH: &'static str = "/etc/pid-autotune/sensorinfo.json";

/// systemd unit of the stock fan controller displaced during a session
pub const DEFAULT_STOCK_CONTROLLER_UNIT: &'static str = "phosphor-pid-control";

/// Default sampling interval in seconds
pub const DEFAULT_POLL_INTERVAL_S: u64 = 1;

/// Default bound on every experiment loop
pub const DEFAULT_MAX_ITERATIONS: u32 = 20_000;

/// Default steady-state detector window length
pub const DEFAULT_STEADY_WINDOW: usize = 10;

/// Default steady-state slope threshold in °C/s
pub const DEFAULT_STEADY_SLOPE_THR: f64 = 0.02;

/// Default steady-state RMSE threshold in °C
pub const DEFAULT_STEADY_RMSE_THR: f64 = 0.2;

/// Default sensor quantization step in °C/LSB (12-bit class sensors)
pub const DEFAULT_Q_STEP_C: f64 = 0.0625;

/// Default sensor absolute accuracy in °C
pub const DEFAULT_ACCURACY_C: f64 = 0.5;

/// Default noise profile sample count
pub const DEFAULT_NOISE_SAMPLES: u32 = 100;

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_S
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_steady_window() -> usize {
    DEFAULT_STEADY_WINDOW
}

fn default_steady_slope_thr() -> f64 {
    DEFAULT_STEADY_SLOPE_THR
}

fn default_steady_rmse_thr() -> f64 {
    DEFAULT_STEADY_RMSE_THR
}

fn default_stock_unit() -> String {
    DEFAULT_STOCK_CONTROLLER_UNIT.to_string()
}

fn default_noise_samples() -> u32 {
    DEFAULT_NOISE_SAMPLES
}

fn default_max_duty() -> u8 {
    255
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct BasicConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_s: u64,
    #[serde(default)]
    pub truncate_decimals: u32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_steady_window")]
    pub steady_window: usize,
    #[serde(default = "default_steady_slope_thr")]
    pub steady_slope_thr_per_s: f64,
    #[serde(default = "default_steady_rmse_thr")]
    pub steady_rmse_thr: f64,
    /// Optional extra tolerance added to the setpoint band
    #[serde(default)]
    pub steady_setpoint_band: f64,
    #[serde(default = "default_stock_unit")]
    pub stock_controller_unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub sensor_info_path: Option<PathBuf>,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            poll_interval_s: DEFAULT_POLL_INTERVAL_S,
            truncate_decimals: 0,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            steady_window: DEFAULT_STEADY_WINDOW,
            steady_slope_thr_per_s: DEFAULT_STEADY_SLOPE_THR,
            steady_rmse_thr: DEFAULT_STEADY_RMSE_THR,
            steady_setpoint_band: 0.0,
            stock_controller_unit: default_stock_unit(),
            sensor_info_path: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct TempSensorConfig {
    pub name: String,
    /// hwmon temperature input path (millidegrees)
    pub input: String,
    pub setpoint: f64,
    /// Sensor type for `sensorinfo` lookup of quantization/accuracy
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub sensor_type: Option<String>,
    /// Explicit quantization step override in °C/LSB
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub q_step_c: Option<f64>,
    /// Explicit absolute accuracy override in °C
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub accuracy_c: Option<f64>,
}

impl TempSensorConfig {
    /// Quantization step, falling back to the sensor database and then the
    /// conservative 12-bit default.
    pub fn q_step_c(&self) -> f64 {
        self.q_step_c
            .or_else(|| self.sensor_info().map(|info| info.q_step_c))
            .unwrap_or(DEFAULT_Q_STEP_C)
    }

    /// Absolute accuracy with the same fallback chain as `q_step_c`.
    pub fn accuracy_c(&self) -> f64 {
        self.accuracy_c
            .or_else(|| self.sensor_info().map(|info| info.accuracy_c))
            .unwrap_or(DEFAULT_ACCURACY_C)
    }

    fn sensor_info(&self) -> Option<sensorinfo::TempInfo> {
        self.sensor_type
            .as_ref()
            .and_then(|sensor_type| sensorinfo::lookup(sensor_type))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct FanChannel {
    pub name: String,
    /// hwmon pwm path written with the raw duty
    pub input: String,
    #[serde(default)]
    pub min_duty: u8,
    #[serde(default = "default_max_duty")]
    pub max_duty: u8,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct BaseDutyConfig {
    /// Raw PWM increment applied while outside the error band
    pub step_outside_tol: u8,
    /// Raw PWM increment applied while inside the band but off setpoint
    pub step_inside_tol: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct StepTriggerConfig {
    /// Signed raw PWM offset applied once the pre-step gate passes
    pub step_duty: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct NoiseProfileConfig {
    #[serde(default = "default_noise_samples")]
    pub sample_count: u32,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_s: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct FopdtConfig {
    /// ε/θ ratios the IMC pass emits gains for, in input order
    pub epsilon_factors: Vec<f64>,
    /// Refine the two-point result by log-linear least squares
    #[serde(default)]
    pub refine_least_squares: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct ImcConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub basic: BasicConfig,
    pub temp: TempSensorConfig,
    pub fans: Vec<FanChannel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub base_duty: Option<BaseDutyConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub step_trigger: Option<StepTriggerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub noise_profile: Option<NoiseProfileConfig>,
    pub fopdt: FopdtConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub imc: Option<ImcConfig>,
}

impl Config {
    /// Parse and validate a JSON config file
    pub fn parse<P: AsRef<Path>>(config_path: P) -> error::Result<Self> {
        let raw = fs::read_to_string(config_path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;

        // Extend the sensor database before q/accuracy resolution happens
        let info_path = config
            .basic
            .sensor_info_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SENSOR_INFO_PATH));
        sensorinfo::load_from_file(info_path)?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the experiments are not defined for. Runs
    /// before any session may start.
    pub fn validate(&self) -> error::Result<()> {
        fn fail<T>(msg: String) -> error::Result<T> {
            Err(ErrorKind::Config(msg).into())
        }

        if self.basic.poll_interval_s < 1 {
            return fail("poll_interval_s must be >= 1".to_string());
        }
        if self.basic.max_iterations < 1 {
            return fail("max_iterations must be >= 1".to_string());
        }
        if self.basic.steady_window < 2 {
            return fail("steady_window must be >= 2".to_string());
        }
        if !(self.basic.steady_slope_thr_per_s >= 0.0) {
            return fail("steady_slope_thr_per_s must be >= 0".to_string());
        }
        if !(self.basic.steady_rmse_thr >= 0.0) {
            return fail("steady_rmse_thr must be >= 0".to_string());
        }
        if !(self.basic.steady_setpoint_band >= 0.0) {
            return fail("steady_setpoint_band must be >= 0".to_string());
        }

        if !self.temp.setpoint.is_finite() {
            return fail(format!("setpoint {} is not finite", self.temp.setpoint));
        }
        if !(self.temp.q_step_c() > 0.0) {
            return fail("q_step_c must be > 0".to_string());
        }
        if !(self.temp.accuracy_c() >= 0.0) {
            return fail("accuracy_c must be >= 0".to_string());
        }

        if self.fans.is_empty() {
            return fail("fan list must not be empty".to_string());
        }
        for fan in self.fans.iter() {
            if fan.min_duty > fan.max_duty {
                return fail(format!(
                    "fan '{}': min_duty {} > max_duty {}",
                    fan.name, fan.min_duty, fan.max_duty
                ));
            }
        }

        if let Some(base_duty) = self.base_duty.as_ref() {
            if base_duty.step_outside_tol < 1 || base_duty.step_inside_tol < 1 {
                return fail("base_duty step tolerances must be >= 1".to_string());
            }
        }

        if self.fopdt.epsilon_factors.is_empty() {
            return fail("epsilon_factors must not be empty".to_string());
        }
        for &factor in self.fopdt.epsilon_factors.iter() {
            if !(factor > 0.0) || !factor.is_finite() {
                return fail(format!("epsilon factor {} must be > 0", factor));
            }
        }

        Ok(())
    }

    /// Unique parent directories of every configured log path, purge
    /// candidates for session start.
    pub fn log_dirs(&self) -> Vec<PathBuf> {
        let paths = [
            self.base_duty.as_ref().and_then(|c| c.log_path.as_ref()),
            self.step_trigger.as_ref().and_then(|c| c.log_path.as_ref()),
            self.noise_profile
                .as_ref()
                .and_then(|c| c.log_path.as_ref()),
            self.fopdt.log_path.as_ref(),
            self.imc.as_ref().and_then(|c| c.log_path.as_ref()),
        ];
        let mut dirs = BTreeSet::new();
        for path in paths.iter().flatten() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    dirs.insert(parent.to_path_buf());
                }
            }
        }
        dirs.into_iter().collect()
    }
}
