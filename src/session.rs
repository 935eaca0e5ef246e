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

//! Session controller: at most one autotune session at a time, exclusive
//! hardware tenancy, cooperative cancellation.
//!
//! The `Service` is the dispatcher-facing half. `enable` admits a session
//! when idle and rejects it with `Busy` otherwise; `cancel` broadcasts the
//! halt condition that the running session observes at phase boundaries,
//! after every sample read and before every hardware write. The stock fan
//! controller is stopped while a session holds the actuators and restarted
//! on every exit path, panics included; the `Enabled` watch property drops
//! to `false` exactly once per terminal transition.

use crate::config::Config;
use crate::error::{self, ErrorKind};
use crate::experiment::base_duty::{self, BaseDutyOutcome};
use crate::experiment::{self, noise_profile, step_trigger};
use crate::fopdt::{self, FopdtParams};
use crate::hal::Hal;
use crate::halt;
use crate::imc::{self, ImcResult};
use crate::logdir;
use crate::sink::{FopdtRecord, PidRecord, Sink};
use crate::steady::WindowStats;

use log::*;

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Session phase, observable by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AcquiringTenancy,
    BaseDuty,
    StepExperiment,
    NoiseProfile,
    Identifying,
    Emitting,
    ReleasingTenancy,
}

/// What a session is asked to run. Mirrors the external control objects:
/// each kind is one enable surface, all sharing the single-session rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// Base-duty search, step experiment, identification, tuning
    Full,
    /// Base-duty search only
    BaseDuty,
    /// Step experiment, identification, tuning (seeded with max(min_duty))
    Step,
    /// Sensor noise profiling only
    Noise,
}

/// Everything a finished session produced. Missing parts mean the
/// corresponding phase was skipped, degraded or cancelled.
#[derive(Debug, Default)]
pub struct SessionOutcome {
    pub base_duty: Option<BaseDutyOutcome>,
    pub fopdt: Option<FopdtParams>,
    pub gains: Vec<ImcResult>,
    pub noise: Option<WindowStats>,
    pub cancelled: bool,
}

struct ServiceState {
    running: bool,
    halt_sender: Option<halt::Sender>,
}

/// Dispatcher-facing session manager
pub struct Service {
    config: Arc<Config>,
    hal: Arc<dyn Hal>,
    sink: Arc<dyn Sink>,
    state: Mutex<ServiceState>,
    phase: Mutex<Phase>,
    enabled_tx: watch::Sender<bool>,
    // keeps the channel alive while no external observer subscribes
    _enabled_rx: watch::Receiver<bool>,
}

impl Service {
    pub fn new(config: Arc<Config>, hal: Arc<dyn Hal>, sink: Arc<dyn Sink>) -> Arc<Self> {
        let (enabled_tx, enabled_rx) = watch::channel(false);
        Arc::new(Self {
            config,
            hal,
            sink,
            state: Mutex::new(ServiceState {
                running: false,
                halt_sender: None,
            }),
            phase: Mutex::new(Phase::Idle),
            enabled_tx,
            _enabled_rx: enabled_rx,
        })
    }

    /// The `Enabled` property: true while a session runs, driven back to
    /// false on every terminal transition.
    pub fn subscribe_enabled(&self) -> watch::Receiver<bool> {
        self.enabled_tx.subscribe()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().expect("BUG: phase lock poisoned")
    }

    /// Admit a session. Fails with `Busy` while one is active; the caller
    /// gets the join handle of the spawned session task.
    pub fn enable(self: &Arc<Self>, kind: RunKind) -> error::Result<JoinHandle<SessionOutcome>> {
        let (halt_tx, halt_rx) = halt::make_pair();
        {
            let mut state = self.state.lock().expect("BUG: service lock poisoned");
            if state.running {
                warn!("Enable rejected: session already running");
                Err(ErrorKind::Busy)?;
            }
            state.running = true;
            state.halt_sender = Some(halt_tx);
        }
        let _ = self.enabled_tx.send(true);

        info!("Session admitted: {:?}", kind);
        let service = self.clone();
        Ok(tokio::spawn(async move {
            Session::run(service, kind, halt_rx).await
        }))
    }

    /// Request cooperative cancellation of the running session. A no-op
    /// when idle; repeated requests are harmless.
    pub fn cancel(&self) {
        let state = self.state.lock().expect("BUG: service lock poisoned");
        if let Some(sender) = state.halt_sender.as_ref() {
            info!("Cancellation requested");
            sender.halt();
        }
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock().expect("BUG: phase lock poisoned") = phase;
        debug!("Session phase: {:?}", phase);
    }
}

/// Restores the world on every session exit path: the stock controller is
/// restarted, the service goes idle and `Enabled` drops to false. Running
/// from `Drop` covers panics in the session body as well.
struct TenancyGuard {
    service: Arc<Service>,
}

impl Drop for TenancyGuard {
    fn drop(&mut self) {
        self.service.set_phase(Phase::ReleasingTenancy);
        if let Err(e) = self.service.hal.start_stock_controller() {
            error!("Stock controller restart failed: {}", e);
        }
        {
            let mut state = self
                .service
                .state
                .lock()
                .expect("BUG: service lock poisoned");
            state.running = false;
            state.halt_sender = None;
        }
        self.service.set_phase(Phase::Idle);
        let _ = self.service.enabled_tx.send(false);
        info!("Session terminated, tenancy released");
    }
}

/// One admitted session, destroyed on its terminal transition
struct Session;

impl Session {
    async fn run(service: Arc<Service>, kind: RunKind, mut halt: halt::Receiver) -> SessionOutcome {
        service.set_phase(Phase::AcquiringTenancy);
        let guard = TenancyGuard {
            service: service.clone(),
        };
        let service = &guard.service;

        let mut outcome = SessionOutcome::default();
        if let Err(e) = service.hal.stop_stock_controller() {
            error!("Cannot stop stock controller, aborting session: {}", e);
            return outcome;
        }

        // Last run's logs go away before new ones are written; a cancelled
        // or failed run keeps them for post-mortem until the next start.
        for dir in service.config.log_dirs() {
            if let Err(e) = logdir::purge(&dir) {
                warn!("Log purge of '{}' skipped: {}", dir.display(), e);
            }
        }

        match Self::run_experiments(service, kind, &mut halt, &mut outcome).await {
            Ok(()) => {}
            Err(e) => match e.kind() {
                ErrorKind::Cancelled => {
                    info!("Session cancelled");
                    outcome.cancelled = true;
                }
                other => {
                    // Degraded output, identical teardown
                    if other.is_recoverable() {
                        warn!("Session degraded: {}", other);
                    } else {
                        error!("Session failed: {}", other);
                    }
                }
            },
        }

        drop(guard);
        outcome
    }

    async fn run_experiments(
        service: &Arc<Service>,
        kind: RunKind,
        halt: &mut halt::Receiver,
        outcome: &mut SessionOutcome,
    ) -> error::Result<()> {
        let config = &*service.config;
        let hal = &*service.hal;
        let sink = &*service.sink;

        if kind == RunKind::Noise {
            service.set_phase(Phase::NoiseProfile);
            outcome.noise = Some(noise_profile::run(config, hal, sink, halt).await?);
            return Ok(());
        }

        // Base-duty search, or its static fallback seed
        let mut start_duty = experiment::initial_duty(config);
        let run_base = kind != RunKind::Step && config.base_duty.is_some();
        if run_base {
            if halt.is_halted() {
                Err(ErrorKind::Cancelled)?;
            }
            service.set_phase(Phase::BaseDuty);
            let base = base_duty::run(config, hal, sink, halt).await?;
            start_duty = base.duty;
            outcome.base_duty = Some(base);
        }

        if kind == RunKind::BaseDuty {
            return Ok(());
        }
        if config.step_trigger.is_none() {
            info!("No step_trigger configured, session ends without gains");
            return Ok(());
        }

        if halt.is_halted() {
            Err(ErrorKind::Cancelled)?;
        }
        service.set_phase(Phase::StepExperiment);
        let response = step_trigger::run(config, hal, sink, halt, start_duty).await?;

        if halt.is_halted() {
            Err(ErrorKind::Cancelled)?;
        }
        service.set_phase(Phase::Identifying);
        let dt = config.basic.poll_interval_s as f64;
        let params = match fopdt::identify(&response, dt) {
            Ok(two_point) => {
                if config.fopdt.refine_least_squares {
                    fopdt::refine_least_squares(&response, dt, two_point)
                } else {
                    two_point
                }
            }
            Err(e) => {
                warn!("Identification failed: {}", e);
                return Ok(());
            }
        };
        info!(
            "FOPDT identified: k={} tau={} theta={}",
            params.k, params.tau, params.theta
        );
        outcome.fopdt = Some(params);

        if halt.is_halted() {
            Err(ErrorKind::Cancelled)?;
        }
        service.set_phase(Phase::Emitting);
        if let Err(e) = sink.fopdt(&FopdtRecord::from(&params)) {
            warn!("FOPDT record dropped: {}", e);
        }

        if config.imc.is_some() {
            let gains = imc::tune(&params, &config.fopdt.epsilon_factors);
            for result in gains.iter() {
                if let Err(e) = sink.pid_row(&PidRecord::from(result)) {
                    warn!("PID record dropped: {}", e);
                }
            }
            outcome.gains = gains;
        }
        Ok(())
    }
}
