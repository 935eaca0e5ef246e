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

use log::*;

use pid_autotune::config;
use pid_autotune::hal::SystemHal;
use pid_autotune::session::{RunKind, Service};
use pid_autotune::sink::CsvSink;

use std::sync::Arc;

#[tokio::main]
async fn main() {
    let app = clap::App::new("pid-autotune")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Thermal PID autotuning over a duty step response")
        .arg(
            clap::Arg::with_name("config")
                .long("config")
                .help("Set config file path")
                .required(false)
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("experiment")
                .long("experiment")
                .short("e")
                .help("What to run: full, base-duty, step or noise")
                .possible_values(&["full", "base-duty", "step", "noise"])
                .default_value("full")
                .takes_value(true),
        );

    let matches = app.get_matches();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = matches
        .value_of("config")
        .unwrap_or(config::DEFAULT_CONFIG_PATH);

    let config = match config::Config::parse(config_path) {
        Err(e) => {
            error!("Cannot load configuration file \"{}\"", config_path);
            error!("Reason: {}", e);
            return;
        }
        Ok(v) => Arc::new(v),
    };

    let kind = match matches.value_of("experiment") {
        Some("base-duty") => RunKind::BaseDuty,
        Some("step") => RunKind::Step,
        Some("noise") => RunKind::Noise,
        _ => RunKind::Full,
    };

    let hal = Arc::new(SystemHal::from_config(&config));
    let sink = Arc::new(CsvSink::from_config(&config));
    let service = Service::new(config, hal, sink);

    // ctrl-c maps to the same cooperative cancellation the remote enable
    // surface uses
    {
        let service = service.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling session");
                service.cancel();
            }
        });
    }

    let session = match service.enable(kind) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Cannot start session: {}", e);
            return;
        }
    };

    match session.await {
        Ok(outcome) => {
            if outcome.cancelled {
                warn!("Session was cancelled, no gains produced");
            } else if let Some(params) = outcome.fopdt.as_ref() {
                info!(
                    "Done: k={} tau={} theta={}, {} gain rows written",
                    params.k,
                    params.tau,
                    params.theta,
                    outcome.gains.len()
                );
            } else {
                info!("Done without identification result");
            }
        }
        Err(e) => error!("Session task failed: {}", e),
    }
}
