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

//! Structured records emitted by a session and the sink that persists them.
//!
//! Experiments hand each record to the sink before reading the next sample,
//! so an observer tailing a log sees monotone iteration indices with no
//! gaps. The CSV sink reproduces the wire format operators already script
//! against: one header line, one flushed line per record.

use crate::config;
use crate::error;
use crate::fopdt::FopdtParams;
use crate::imc::ImcResult;
use crate::steady::WindowStats;

use serde::Serialize;

use std::fs;
use std::io::{LineWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

/// One base-duty search iteration
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BaseDutyRecord {
    pub iter: u32,
    pub duty: u8,
    pub temp_truncated: f64,
}

/// One step-experiment sample with the detector stats at that point
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepRecord {
    pub t_index: u32,
    pub temp_truncated: f64,
    pub pwm: u8,
    pub slope: f64,
    pub rmse: f64,
    pub n: usize,
    pub mean: f64,
}

/// Noise profile summary
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoiseRecord {
    pub slope: f64,
    pub rmse: f64,
    pub mean: f64,
    pub samples: u32,
    pub interval_s: u64,
}

impl NoiseRecord {
    pub fn from_stats(stats: &WindowStats, samples: u32, interval_s: u64) -> Self {
        Self {
            slope: stats.slope,
            rmse: stats.rmse,
            mean: stats.mean,
            samples,
            interval_s,
        }
    }
}

/// Identified process model
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FopdtRecord {
    pub k: f64,
    pub tau: f64,
    pub theta: f64,
}

impl From<&FopdtParams> for FopdtRecord {
    fn from(params: &FopdtParams) -> Self {
        Self {
            k: params.k,
            tau: params.tau,
            theta: params.theta,
        }
    }
}

/// One tuned gain row, two per epsilon factor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PidRecord {
    pub epsilon: f64,
    pub ratio: f64,
    #[serde(rename = "type")]
    pub rule: String,
    #[serde(rename = "Kp")]
    pub kp: f64,
    #[serde(rename = "Ki")]
    pub ki: f64,
    #[serde(rename = "Kd")]
    pub kd: f64,
}

impl From<&ImcResult> for PidRecord {
    fn from(result: &ImcResult) -> Self {
        Self {
            epsilon: result.epsilon,
            ratio: result.ratio,
            rule: result.rule.label().to_string(),
            kp: result.gains.kp,
            ki: result.gains.ki,
            kd: result.gains.kd,
        }
    }
}

/// Consumer of session records. Implementations must tolerate being called
/// from the session task at sample rate.
pub trait Sink: Send + Sync {
    fn base_duty(&self, record: &BaseDutyRecord) -> error::Result<()>;
    fn step(&self, record: &StepRecord) -> error::Result<()>;
    fn noise(&self, record: &NoiseRecord) -> error::Result<()>;
    fn fopdt(&self, record: &FopdtRecord) -> error::Result<()>;
    fn pid_row(&self, record: &PidRecord) -> error::Result<()>;
}

/// A lazily-opened CSV stream: header on first record, flush per line
struct CsvFile {
    path: Option<PathBuf>,
    header: &'static str,
    writer: Mutex<Option<LineWriter<fs::File>>>,
}

impl CsvFile {
    fn new(path: Option<PathBuf>, header: &'static str) -> Self {
        Self {
            path,
            header,
            writer: Mutex::new(None),
        }
    }

    fn write_line(&self, line: String) -> error::Result<()> {
        let path = match self.path.as_ref() {
            Some(path) => path,
            None => return Ok(()),
        };
        let mut guard = self.writer.lock().expect("BUG: csv writer lock poisoned");
        if guard.is_none() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut writer = LineWriter::new(fs::File::create(path)?);
            writeln!(writer, "{}", self.header)?;
            *guard = Some(writer);
        }
        let writer = guard.as_mut().expect("BUG: csv writer missing");
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}

/// File sink writing the operator-facing CSV logs
pub struct CsvSink {
    base_duty: CsvFile,
    step: CsvFile,
    noise: CsvFile,
    fopdt: CsvFile,
    pid: CsvFile,
}

impl CsvSink {
    pub fn from_config(config: &config::Config) -> Self {
        Self {
            base_duty: CsvFile::new(
                config.base_duty.as_ref().and_then(|c| c.log_path.clone()),
                "iter,duty,temp_trunc",
            ),
            step: CsvFile::new(
                config.step_trigger.as_ref().and_then(|c| c.log_path.clone()),
                "t_index,temp_trunc,pwm,slope,rmse,n,mean",
            ),
            noise: CsvFile::new(
                config
                    .noise_profile
                    .as_ref()
                    .and_then(|c| c.log_path.clone()),
                "slope,rmse,mean,samples,interval_s",
            ),
            fopdt: CsvFile::new(config.fopdt.log_path.clone(), "k,tau,theta"),
            pid: CsvFile::new(
                config.imc.as_ref().and_then(|c| c.log_path.clone()),
                "epsilon,ratio,type,Kp,Ki,Kd",
            ),
        }
    }
}

impl Sink for CsvSink {
    fn base_duty(&self, record: &BaseDutyRecord) -> error::Result<()> {
        self.base_duty.write_line(format!(
            "{},{},{}",
            record.iter, record.duty, record.temp_truncated
        ))
    }

    fn step(&self, record: &StepRecord) -> error::Result<()> {
        self.step.write_line(format!(
            "{},{},{},{},{},{},{}",
            record.t_index,
            record.temp_truncated,
            record.pwm,
            record.slope,
            record.rmse,
            record.n,
            record.mean
        ))
    }

    fn noise(&self, record: &NoiseRecord) -> error::Result<()> {
        self.noise.write_line(format!(
            "{},{},{},{},{}",
            record.slope, record.rmse, record.mean, record.samples, record.interval_s
        ))
    }

    fn fopdt(&self, record: &FopdtRecord) -> error::Result<()> {
        self.fopdt
            .write_line(format!("{},{},{}", record.k, record.tau, record.theta))
    }

    fn pid_row(&self, record: &PidRecord) -> error::Result<()> {
        self.pid.write_line(format!(
            "{},{},{},{},{},{}",
            record.epsilon, record.ratio, record.rule, record.kp, record.ki, record.kd
        ))
    }
}

/// In-memory sink for tests and dry runs
#[derive(Default)]
pub struct MemorySink {
    pub base_duty: Mutex<Vec<BaseDutyRecord>>,
    pub step: Mutex<Vec<StepRecord>>,
    pub noise: Mutex<Vec<NoiseRecord>>,
    pub fopdt: Mutex<Vec<FopdtRecord>>,
    pub pid: Mutex<Vec<PidRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Sink for MemorySink {
    fn base_duty(&self, record: &BaseDutyRecord) -> error::Result<()> {
        self.base_duty.lock().unwrap().push(*record);
        Ok(())
    }

    fn step(&self, record: &StepRecord) -> error::Result<()> {
        self.step.lock().unwrap().push(*record);
        Ok(())
    }

    fn noise(&self, record: &NoiseRecord) -> error::Result<()> {
        self.noise.lock().unwrap().push(*record);
        Ok(())
    }

    fn fopdt(&self, record: &FopdtRecord) -> error::Result<()> {
        self.fopdt.lock().unwrap().push(*record);
        Ok(())
    }

    fn pid_row(&self, record: &PidRecord) -> error::Result<()> {
        self.pid.lock().unwrap().push(record.clone());
        Ok(())
    }
}
