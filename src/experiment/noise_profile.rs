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

//! Sensor noise profiling.
//!
//! Samples the temperature at a fixed duty (whatever the operator set
//! beforehand; this run never writes PWM) and reports the regression stats
//! of the whole window. The reported slope and RMSE are what an operator
//! feeds back into `steady_slope_thr_per_s` / `steady_rmse_thr`.

use super::{sleep_or_halt, TempReader};
use crate::config::Config;
use crate::error::{self, ErrorKind};
use crate::hal::Hal;
use crate::halt;
use crate::sink::{NoiseRecord, Sink};
use crate::steady::{SteadyStateDetector, WindowStats};

use log::*;

/// Thresholds are irrelevant here, only the stats are wanted
const LOOSE_THRESHOLD: f64 = 1000.0;

pub async fn run(
    config: &Config,
    hal: &dyn Hal,
    sink: &dyn Sink,
    halt: &mut halt::Receiver,
) -> error::Result<WindowStats> {
    let profile = config
        .noise_profile
        .as_ref()
        .ok_or_else(|| ErrorKind::Config("noise_profile section missing".to_string()))?;

    let samples = profile.sample_count.max(2);
    let interval = profile.poll_interval_s.max(1);

    info!("NoiseProfile: samples={} interval={}s", samples, interval);

    let mut detector = SteadyStateDetector::new(
        samples as usize,
        interval as f64,
        LOOSE_THRESHOLD,
        LOOSE_THRESHOLD,
        config.temp.q_step_c(),
    );
    let mut reader = TempReader::new();

    for i in 0..samples {
        if halt.is_halted() {
            return Err(ErrorKind::Cancelled.into());
        }
        // Raw readings: truncation would hide exactly the noise being measured
        let temp = reader.read(hal).await;
        detector.push(temp);

        if i + 1 < samples {
            sleep_or_halt(hal, halt, interval).await?;
        }
    }

    let stats = detector.stats();
    info!(
        "NoiseProfile: slope={} rmse={} mean={}",
        stats.slope, stats.rmse, stats.mean
    );

    let record = NoiseRecord::from_stats(&stats, samples, interval);
    if let Err(e) = sink.noise(&record) {
        warn!("NoiseProfile: record dropped: {}", e);
    }
    Ok(stats)
}
