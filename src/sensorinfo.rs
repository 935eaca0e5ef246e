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

//! Physical temperature sensor database.
//!
//! Resolves a sensor type string (e.g. `"tmp75"`) to the quantization step
//! and absolute accuracy that drive the steady-state detector floors and the
//! setpoint band. A built-in table covers the common BMC sensors; an
//! optional JSON file can extend or override it.

use crate::error;

use lazy_static::lazy_static;
use serde::Deserialize;

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

/// Temperature sensor characteristics resolved by sensor type.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TempInfo {
    /// Quantization step in °C per LSB
    #[serde(rename = "q")]
    pub q_step_c: f64,
    /// Typical absolute accuracy in °C
    pub accuracy_c: f64,
    /// ADC resolution in bits, informational
    #[serde(default)]
    pub bits: u32,
    /// Conversion time in ms, informational
    #[serde(default)]
    pub tconv_ms: u32,
}

lazy_static! {
    /// Sensors commonly found on BMC-managed boards
    static ref BUILTIN: Vec<(&'static str, TempInfo)> = vec![
        ("tmp75", TempInfo { q_step_c: 0.0625, accuracy_c: 1.0, bits: 12, tconv_ms: 220 }),
        ("tmp112", TempInfo { q_step_c: 0.0625, accuracy_c: 0.5, bits: 12, tconv_ms: 35 }),
        ("tmp451", TempInfo { q_step_c: 0.0625, accuracy_c: 1.0, bits: 12, tconv_ms: 32 }),
        ("lm75", TempInfo { q_step_c: 0.5, accuracy_c: 2.0, bits: 9, tconv_ms: 100 }),
        ("nct7802", TempInfo { q_step_c: 0.25, accuracy_c: 1.0, bits: 10, tconv_ms: 50 }),
    ];

    static ref OVERRIDES: Mutex<HashMap<String, TempInfo>> = Mutex::new(HashMap::new());
}

#[derive(Debug, Deserialize)]
struct InfoFile {
    #[serde(rename = "tempsensorinfo")]
    temp_sensor_info: Vec<InfoEntry>,
}

#[derive(Debug, Deserialize)]
struct InfoEntry {
    #[serde(rename = "type")]
    sensor_type: String,
    #[serde(flatten)]
    info: TempInfo,
}

/// Load a JSON database; entries shadow the built-in table. A missing file
/// is not fatal, a malformed one is.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> error::Result<bool> {
    let raw = match fs::read_to_string(path.as_ref()) {
        Ok(raw) => raw,
        Err(_) => return Ok(false),
    };
    let parsed: InfoFile = serde_json::from_str(&raw)?;
    let mut map = OVERRIDES.lock().expect("BUG: sensorinfo lock poisoned");
    for entry in parsed.temp_sensor_info {
        map.insert(entry.sensor_type, entry.info);
    }
    Ok(true)
}

/// Lookup by sensor type. Overrides win over the built-in table.
pub fn lookup(sensor_type: &str) -> Option<TempInfo> {
    let map = OVERRIDES.lock().expect("BUG: sensorinfo lock poisoned");
    if let Some(info) = map.get(sensor_type) {
        return Some(*info);
    }
    BUILTIN
        .iter()
        .find(|(name, _)| *name == sensor_type)
        .map(|(_, info)| *info)
}

/// Drop loaded overrides (tests)
pub fn clear_overrides() {
    OVERRIDES
        .lock()
        .expect("BUG: sensorinfo lock poisoned")
        .clear();
}
