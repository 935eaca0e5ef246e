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

//! Hardware capabilities consumed by the experiments: one temperature
//! input, one homogeneous fan group, and the lifecycle of the stock fan
//! controller that must stay out of the way while a session owns the
//! actuators.

use crate::config;
use crate::error::{self, ErrorKind};

use async_trait::async_trait;
use failure::ResultExt;

use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// Raw PWM duty applied to the fan group.
///
/// The representation makes out-of-range writes impossible; any arithmetic
/// that could leave `[0, 255]` goes through [`Duty::clamped`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duty(u8);

impl Duty {
    pub const FULL: Self = Self(255);
    pub const STOPPED: Self = Self(0);

    pub fn new(raw: u8) -> Self {
        Duty(raw)
    }

    /// Clamp a signed offset computation back into the raw range.
    pub fn clamped(raw: i32) -> Self {
        Duty(raw.max(0).min(255) as u8)
    }

    /// Shift by a signed raw offset, saturating at the range ends.
    pub fn offset(self, delta: i32) -> Self {
        Self::clamped(i32::from(self.0) + delta)
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    /// Duty as percent of full scale
    pub fn percent(self) -> f64 {
        crate::utils::pwm_to_percent(self.0)
    }
}

impl std::fmt::Display for Duty {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capabilities the session borrows from its host for the duration of a run
#[async_trait]
pub trait Hal: Send + Sync {
    /// Read the configured temperature in °C
    async fn read_temp(&self) -> error::Result<f64>;

    /// Apply `duty` to every fan in the configured group
    async fn write_pwm_all(&self, duty: Duty) -> error::Result<()>;

    /// Inter-sample wait. Cancellation is layered on top by the caller
    /// (the session selects this against the halt condition).
    async fn sleep(&self, duration: Duration);

    /// Stop the stock fan controller. Idempotent.
    fn stop_stock_controller(&self) -> error::Result<()>;

    /// Start the stock fan controller. Idempotent, called on every session
    /// exit path.
    fn start_stock_controller(&self) -> error::Result<()>;
}

/// Production implementation: hwmon sysfs for sensor/fans, systemd for the
/// stock controller lifecycle.
pub struct SystemHal {
    temp_input: PathBuf,
    pwm_paths: Vec<PathBuf>,
    stock_unit: String,
}

impl SystemHal {
    pub fn from_config(config: &config::Config) -> Self {
        Self {
            temp_input: PathBuf::from(&config.temp.input),
            pwm_paths: config
                .fans
                .iter()
                .map(|fan| PathBuf::from(&fan.input))
                .collect(),
            stock_unit: config.basic.stock_controller_unit.clone(),
        }
    }

    fn systemctl(&self, verb: &str) -> error::Result<()> {
        let status = Command::new("systemctl")
            .arg(verb)
            .arg(&self.stock_unit)
            .status()
            .with_context(|_| {
                ErrorKind::Hardware(format!("systemctl {} {}", verb, self.stock_unit))
            })?;
        if !status.success() {
            Err(ErrorKind::Hardware(format!(
                "systemctl {} {} exited with {}",
                verb, self.stock_unit, status
            )))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Hal for SystemHal {
    async fn read_temp(&self) -> error::Result<f64> {
        // hwmon exposes millidegrees as ASCII
        let raw = fs::read_to_string(&self.temp_input)
            .with_context(|_| ErrorKind::Hardware(format!("read {}", self.temp_input.display())))?;
        let milli: i64 = raw
            .trim()
            .parse::<i64>()
            .with_context(|_| ErrorKind::Hardware(format!("parse {}", self.temp_input.display())))?;
        Ok(milli as f64 / 1000.0)
    }

    async fn write_pwm_all(&self, duty: Duty) -> error::Result<()> {
        for path in self.pwm_paths.iter() {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .open(path)
                .with_context(|_| ErrorKind::Hardware(format!("open {}", path.display())))?;
            writeln!(file, "{}", duty.raw())
                .with_context(|_| ErrorKind::Hardware(format!("write {}", path.display())))?;
        }
        Ok(())
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn stop_stock_controller(&self) -> error::Result<()> {
        self.systemctl("stop")
    }

    fn start_stock_controller(&self) -> error::Result<()> {
        self.systemctl("start")
    }
}
