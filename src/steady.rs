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

//! Quantization-aware steady-state detection.
//!
//! A sliding window of temperature samples is fit with ordinary least
//! squares against synthetic times `i * dt`; the signal counts as steady
//! once the window is full, the slope magnitude is within threshold and the
//! regression RMSE is within threshold.
//!
//! A perfectly still sensor still shows uniform quantization noise with
//! standard deviation `q / sqrt(12)`, so user thresholds tighter than that
//! floor are unachievable and get raised to it.

use std::collections::VecDeque;

/// Window statistics and regression results (telemetry projection).
///
/// Only meaningful once `n` reaches the configured window length; under a
/// two-sample minimum everything is zeroed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowStats {
    pub n: usize,
    /// mean(y) in °C
    pub mean: f64,
    /// regression slope in °C/s
    pub slope: f64,
    /// sqrt(mean(e^2)) in °C
    pub rmse: f64,
    /// effective slope threshold (user threshold raised to the floor)
    pub slope_thr_eff: f64,
    /// effective rmse threshold (user threshold raised to the floor)
    pub rmse_thr_eff: f64,
}

/// Linear regression + RMSE steady-state detector
pub struct SteadyStateDetector {
    window: usize,
    dt: f64,
    user_slope_thr: f64,
    user_rmse_thr: f64,
    /// rmse floor due to quantization, `q / sqrt(12)`
    rmse_floor: f64,
    /// slope floor due to quantization, `rmse_floor / dt`
    slope_floor: f64,
    buf: VecDeque<f64>,
    last_stats: Option<WindowStats>,
}

impl SteadyStateDetector {
    /// `dt_s`: sampling interval; `slope_thr`: desired °C/s threshold;
    /// `rmse_thr`: desired °C threshold; `q_step_c`: sensor quantization
    /// step in °C/LSB.
    pub fn new(window: usize, dt_s: f64, slope_thr: f64, rmse_thr: f64, q_step_c: f64) -> Self {
        let window = window.max(2);
        let dt = if dt_s > 0.0 { dt_s } else { 1.0 };
        let q = if q_step_c > 0.0 {
            q_step_c
        } else {
            crate::config::DEFAULT_Q_STEP_C
        };
        let rmse_floor = q / 12f64.sqrt();
        Self {
            window,
            dt,
            user_slope_thr: slope_thr.abs(),
            user_rmse_thr: rmse_thr.abs(),
            rmse_floor,
            slope_floor: rmse_floor / dt,
            buf: VecDeque::with_capacity(window + 1),
            last_stats: None,
        }
    }

    /// Detector matching an experiment configuration
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.basic.steady_window,
            config.basic.poll_interval_s as f64,
            config.basic.steady_slope_thr_per_s,
            config.basic.steady_rmse_thr,
            config.temp.q_step_c(),
        )
    }

    /// Append a sample (already truncated if the caller wants that),
    /// dropping the oldest on overflow.
    pub fn push(&mut self, y: f64) {
        self.buf.push_back(y);
        while self.buf.len() > self.window {
            self.buf.pop_front();
        }
        if self.buf.len() >= 2 {
            self.compute_stats();
        } else {
            self.last_stats = None;
        }
    }

    /// Current window statistics, zeroed while the window holds < 2 samples
    pub fn stats(&self) -> WindowStats {
        self.last_stats.unwrap_or_default()
    }

    /// Window full, |slope| and rmse inside their effective thresholds
    pub fn is_steady(&self) -> bool {
        match self.last_stats {
            Some(stats) => {
                stats.n >= self.window
                    && stats.slope.abs() <= stats.slope_thr_eff
                    && stats.rmse <= stats.rmse_thr_eff
            }
            None => false,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.last_stats = None;
    }

    fn compute_stats(&mut self) {
        let n = self.buf.len();
        let nf = n as f64;

        // t_i = 0, dt, 2dt, ..., (n-1)dt over the window only; absolute
        // sample age is irrelevant for slope and rmse.
        let mut sum_t = 0.0;
        let mut sum_y = 0.0;
        let mut sum_tt = 0.0;
        let mut sum_ty = 0.0;
        for (i, &y) in self.buf.iter().enumerate() {
            let t = i as f64 * self.dt;
            sum_t += t;
            sum_y += y;
            sum_tt += t * t;
            sum_ty += t * y;
        }
        let t_bar = sum_t / nf;
        let y_bar = sum_y / nf;

        let s_xx = sum_tt - nf * t_bar * t_bar;
        let s_xy = sum_ty - nf * t_bar * y_bar;

        // S_xx <= 0 is a degenerate window (all identical times)
        let slope = if s_xx > 0.0 { s_xy / s_xx } else { 0.0 };

        let mut sse = 0.0;
        for (i, &y) in self.buf.iter().enumerate() {
            let t = i as f64 * self.dt;
            let e = y - (y_bar + slope * (t - t_bar));
            sse += e * e;
        }
        let rmse = (sse / nf).sqrt();

        self.last_stats = Some(WindowStats {
            n,
            mean: y_bar,
            slope,
            rmse,
            slope_thr_eff: self.user_slope_thr.max(self.slope_floor),
            rmse_thr_eff: self.user_rmse_thr.max(self.rmse_floor),
        });
    }
}
