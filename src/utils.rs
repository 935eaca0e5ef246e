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

//! Numeric helpers shared by the experiments and the identifier.

/// Truncate a floating value to `decimals` decimal places without rounding.
///
/// Both the measured temperature and the setpoint go through this with the
/// same `decimals` so that band comparisons stay consistent.
pub fn truncate_decimals(value: f64, decimals: u32) -> f64 {
    if decimals == 0 {
        return value.floor();
    }
    let scale = 10f64.powi(decimals as i32);
    (value * scale).floor() / scale
}

/// Convert PWM raw `[0, 255]` to percent `[0, 100]`.
pub fn pwm_to_percent(pwm: u8) -> f64 {
    f64::from(pwm) / 255.0 * 100.0
}

/// Convert percent `[0, 100]` to PWM raw `[0, 255]`.
pub fn percent_to_pwm(percent: f64) -> u8 {
    let clamped = percent.max(0.0).min(100.0);
    (clamped / 100.0 * 255.0).round() as u8
}
