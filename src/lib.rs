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

//! Closed-loop autotuning for thermal PID control.
//!
//! A session takes exclusive ownership of one temperature input and one
//! homogeneous fan group, searches for the duty holding the setpoint,
//! records a duty step response, identifies a first-order-plus-dead-time
//! process model from it, and maps the model to PID gains via Internal
//! Model Control. The stock fan controller is displaced for the duration
//! and restored on every exit path.

pub mod config;
pub mod error;
pub mod experiment;
pub mod fopdt;
pub mod hal;
pub mod halt;
pub mod imc;
pub mod logdir;
pub mod sensorinfo;
pub mod session;
pub mod sink;
pub mod steady;
pub mod utils;
