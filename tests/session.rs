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

//! End-to-end session tests against a simulated first-order fan/temperature
//! plant. The plant advances one sampling tick per temperature read, so the
//! tests run at full speed while the session believes it is sampling in
//! real time.

use pid_autotune::config::{
    BaseDutyConfig, BasicConfig, Config, FanChannel, FopdtConfig, ImcConfig, StepTriggerConfig,
    TempSensorConfig,
};
use pid_autotune::error::{self, ErrorKind};
use pid_autotune::experiment::{Sample, StepResponse};
use pid_autotune::fopdt;
use pid_autotune::hal::{Duty, Hal};
use pid_autotune::imc::{self, TuningRule};
use pid_autotune::session::{RunKind, Service};
use pid_autotune::sink::MemorySink;
use pid_autotune::utils::pwm_to_percent;

use async_trait::async_trait;

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// First-order-plus-dead-time fan plant. One tick elapses per
/// `read_temp`; duty writes take effect from the following tick and reach
/// the output `theta_ticks` later.
struct PlantModel {
    /// °C per raw duty step (negative: higher duty cools)
    k_per_raw: f64,
    tau_s: f64,
    theta_ticks: usize,
    /// temperature held at `ref_duty`
    temp_ref: f64,
    ref_duty: f64,
    dt_s: f64,
}

struct PlantState {
    temp: f64,
    current_duty: u8,
    duty_history: Vec<u8>,
    reads: u32,
    writes: u32,
    stop_calls: u32,
    start_calls: u32,
    /// arm the cancel hook once this many writes happened
    cancel_arm_writes: u32,
    /// fire the hook this many reads after arming
    cancel_after_reads: u32,
    armed_at_read: Option<u32>,
    writes_at_cancel: Option<u32>,
    hook: Option<Box<dyn Fn() + Send>>,
}

struct SimPlant {
    model: PlantModel,
    state: Mutex<PlantState>,
}

impl SimPlant {
    fn new(model: PlantModel, initial_duty: u8) -> Arc<Self> {
        let temp = model.temp_ref;
        Arc::new(Self {
            model,
            state: Mutex::new(PlantState {
                temp,
                current_duty: initial_duty,
                duty_history: Vec::new(),
                reads: 0,
                writes: 0,
                stop_calls: 0,
                start_calls: 0,
                cancel_arm_writes: 0,
                cancel_after_reads: 0,
                armed_at_read: None,
                writes_at_cancel: None,
                hook: None,
            }),
        })
    }

    /// Fire `hook` once, `after_reads` reads after the `arm_writes`-th
    /// duty write was observed
    fn set_cancel_hook<F: Fn() + Send + 'static>(
        &self,
        arm_writes: u32,
        after_reads: u32,
        hook: F,
    ) {
        let mut state = self.state.lock().unwrap();
        state.cancel_arm_writes = arm_writes;
        state.cancel_after_reads = after_reads;
        state.hook = Some(Box::new(hook));
    }

    fn writes(&self) -> u32 {
        self.state.lock().unwrap().writes
    }

    fn current_duty(&self) -> u8 {
        self.state.lock().unwrap().current_duty
    }

    fn writes_at_cancel(&self) -> Option<u32> {
        self.state.lock().unwrap().writes_at_cancel
    }

    fn stop_calls(&self) -> u32 {
        self.state.lock().unwrap().stop_calls
    }

    fn start_calls(&self) -> u32 {
        self.state.lock().unwrap().start_calls
    }
}

#[async_trait]
impl Hal for SimPlant {
    async fn read_temp(&self) -> error::Result<f64> {
        let mut state = self.state.lock().unwrap();
        let duty = state.current_duty;
        state.duty_history.push(duty);

        let delayed_index = state
            .duty_history
            .len()
            .saturating_sub(1 + self.model.theta_ticks);
        let delayed_duty = f64::from(state.duty_history[delayed_index]);
        let target = self.model.temp_ref + self.model.k_per_raw * (delayed_duty - self.model.ref_duty);
        let decay = (-self.model.dt_s / self.model.tau_s).exp();
        state.temp = target + (state.temp - target) * decay;
        state.reads += 1;

        // cooperative cancellation injection for the E3-style tests
        let fire = match (state.armed_at_read, state.hook.is_some()) {
            (Some(armed), true) => state.reads >= armed + state.cancel_after_reads,
            _ => false,
        };
        if fire {
            let hook = state.hook.take().expect("hook fires once");
            state.writes_at_cancel = Some(state.writes);
            let temp = state.temp;
            drop(state);
            hook();
            return Ok(temp);
        }

        Ok(state.temp)
    }

    async fn write_pwm_all(&self, duty: Duty) -> error::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.current_duty = duty.raw();
        state.writes += 1;
        if state.hook.is_some()
            && state.armed_at_read.is_none()
            && state.cancel_arm_writes > 0
            && state.writes >= state.cancel_arm_writes
        {
            state.armed_at_read = Some(state.reads);
        }
        Ok(())
    }

    async fn sleep(&self, _duration: Duration) {
        // simulated time advances in read_temp
    }

    fn stop_stock_controller(&self) -> error::Result<()> {
        self.state.lock().unwrap().stop_calls += 1;
        Ok(())
    }

    fn start_stock_controller(&self) -> error::Result<()> {
        self.state.lock().unwrap().start_calls += 1;
        Ok(())
    }
}

fn base_config() -> Config {
    Config {
        basic: BasicConfig {
            poll_interval_s: 1,
            truncate_decimals: 2,
            max_iterations: 2000,
            steady_window: 10,
            steady_slope_thr_per_s: 0.05,
            steady_rmse_thr: 0.25,
            steady_setpoint_band: 0.0,
            ..Default::default()
        },
        temp: TempSensorConfig {
            name: "CPU_TEMP".to_string(),
            input: "/sim/temp".to_string(),
            setpoint: 70.0,
            sensor_type: None,
            q_step_c: Some(0.0625),
            accuracy_c: Some(0.5),
        },
        fans: vec![FanChannel {
            name: "FAN0".to_string(),
            input: "/sim/pwm0".to_string(),
            min_duty: 50,
            max_duty: 255,
        }],
        base_duty: Some(BaseDutyConfig {
            step_outside_tol: 10,
            step_inside_tol: 1,
            log_path: None,
        }),
        step_trigger: Some(StepTriggerConfig {
            step_duty: 26,
            log_path: None,
        }),
        noise_profile: None,
        fopdt: FopdtConfig {
            epsilon_factors: vec![0.5, 1.0, 2.0],
            refine_least_squares: false,
            log_path: None,
        },
        imc: Some(ImcConfig::default()),
    }
}

/// Cooling plant matching `base_config`: 78 °C at the initial duty,
/// 0.05 °C per raw step. `tau_s` well below the 1 s sampling interval
/// makes the plant quasi-static per tick, the regime the dead-zone search
/// is designed for.
fn cooling_plant(tau_s: f64, theta_ticks: usize) -> Arc<SimPlant> {
    SimPlant::new(
        PlantModel {
            k_per_raw: -0.05,
            tau_s,
            theta_ticks,
            temp_ref: 78.0,
            ref_duty: 50.0,
            dt_s: 1.0,
        },
        50,
    )
}

/// Plant already holding the setpoint at duty 210, for step-only runs that
/// seed the experiment with `max(min_duty)`
fn settled_plant(tau_s: f64, theta_ticks: usize) -> Arc<SimPlant> {
    SimPlant::new(
        PlantModel {
            k_per_raw: -0.05,
            tau_s,
            theta_ticks,
            temp_ref: 70.0,
            ref_duty: 210.0,
            dt_s: 1.0,
        },
        210,
    )
}

#[tokio::test]
async fn full_session_produces_gains() {
    let config = Arc::new(base_config());
    let plant = cooling_plant(0.5, 0);
    let sink = Arc::new(MemorySink::new());
    let service = Service::new(config.clone(), plant.clone(), sink.clone());

    let outcome = service
        .enable(RunKind::Full)
        .expect("idle service admits a session")
        .await
        .expect("session task completes");

    assert!(!outcome.cancelled);
    let base = outcome.base_duty.expect("base duty ran");
    assert!(base.converged, "base duty search converges");
    // T = 78 - 0.05 * (duty - 50): the 0.5 band around 70 maps to 200..220
    assert!(
        base.duty.raw() >= 195 && base.duty.raw() <= 225,
        "implausible base duty {}",
        base.duty
    );
    assert!(base.iterations < config.basic.max_iterations);

    let params = outcome.fopdt.expect("identification succeeded");
    assert!(params.k < 0.0, "cooling plant has negative gain");
    assert!(params.tau > 0.0);
    assert!(params.theta >= 0.0);

    // one PID row and one Improved PI row per factor, factor order kept
    assert_eq!(outcome.gains.len(), 6);
    for (i, _) in config.fopdt.epsilon_factors.iter().enumerate() {
        assert_eq!(outcome.gains[2 * i].rule, TuningRule::Pid);
        assert_eq!(outcome.gains[2 * i + 1].rule, TuningRule::ImprovedPi);
    }

    // emitted records match the outcome
    assert_eq!(sink.fopdt.lock().unwrap().len(), 1);
    assert_eq!(sink.pid.lock().unwrap().len(), 6);
    assert!(!sink.base_duty.lock().unwrap().is_empty());
    assert!(!sink.step.lock().unwrap().is_empty());

    // tenancy: stopped and restarted exactly once
    assert_eq!(plant.stop_calls(), 1);
    assert_eq!(plant.start_calls(), 1);
    assert_eq!(*service.subscribe_enabled().borrow(), false);
}

#[tokio::test]
async fn base_duty_progress_records_are_gapless() {
    let config = Arc::new(base_config());
    let plant = cooling_plant(0.2, 0);
    let sink = Arc::new(MemorySink::new());
    let service = Service::new(config, plant, sink.clone());

    let outcome = service
        .enable(RunKind::BaseDuty)
        .unwrap()
        .await
        .unwrap();
    assert!(outcome.base_duty.unwrap().converged);

    let records = sink.base_duty.lock().unwrap();
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.iter, i as u32, "iteration indices monotone, no gaps");
    }
    // a base-duty-only run identifies nothing
    assert!(sink.fopdt.lock().unwrap().is_empty());
    assert!(sink.pid.lock().unwrap().is_empty());
}

#[tokio::test]
async fn base_duty_convergence_near_setpoint() {
    // essentially instantaneous plant: the dead-zone walk alone decides
    let config = Arc::new(base_config());
    let plant = cooling_plant(0.2, 0);
    let sink = Arc::new(MemorySink::new());
    let service = Service::new(config.clone(), plant, sink.clone());

    let outcome = service.enable(RunKind::BaseDuty).unwrap().await.unwrap();
    let base = outcome.base_duty.expect("base duty ran");
    assert!(base.converged);
    assert!(base.iterations < config.basic.max_iterations);

    // the window mean at convergence sits within the band of the setpoint
    let last = *sink.base_duty.lock().unwrap().last().unwrap();
    assert!(
        (last.temp_truncated - 70.0).abs() <= 0.5 + 0.05,
        "converged temperature {} too far from setpoint",
        last.temp_truncated
    );
}

#[tokio::test]
async fn identification_recovers_plant_parameters() {
    // Step-only run seeded right at the holding duty; tight thresholds keep
    // the capture long enough for an accurate tail.
    let mut config = base_config();
    config.base_duty = None;
    config.fans[0].min_duty = 210;
    config.basic.truncate_decimals = 4;
    config.basic.steady_slope_thr_per_s = 0.001;
    config.basic.steady_rmse_thr = 0.01;
    config.temp.q_step_c = Some(0.0001);
    config.temp.accuracy_c = Some(0.01);
    let config = Arc::new(config);

    let plant = settled_plant(5.0, 2);
    let sink = Arc::new(MemorySink::new());
    let service = Service::new(config, plant, sink);

    let outcome = service.enable(RunKind::Step).unwrap().await.unwrap();
    let params = outcome.fopdt.expect("identification succeeded");

    let expected_k = -0.05 * 255.0 / 100.0; // °C per percent
    assert!(
        (params.k - expected_k).abs() / expected_k.abs() < 0.1,
        "k {} vs expected {}",
        params.k,
        expected_k
    );
    assert!(
        (params.tau - 5.0).abs() / 5.0 < 0.15,
        "tau {} vs expected 5",
        params.tau
    );
    assert!(
        (params.theta - 2.0).abs() <= 1.2,
        "theta {} vs expected 2",
        params.theta
    );
}

#[tokio::test]
async fn base_duty_exhaustion_applies_best_duty() {
    // setpoint below what the plant can reach: the search must give up
    // after max_iterations and leave the closest duty applied
    let mut config = base_config();
    config.temp.setpoint = 50.0;
    config.basic.max_iterations = 30;
    let config = Arc::new(config);

    let plant = cooling_plant(0.2, 0);
    let sink = Arc::new(MemorySink::new());
    let service = Service::new(config.clone(), plant.clone(), sink);

    let outcome = service.enable(RunKind::BaseDuty).unwrap().await.unwrap();
    let base = outcome.base_duty.expect("base duty ran");
    assert!(!base.converged);
    assert_eq!(base.iterations, config.basic.max_iterations);
    // coolest reachable point is full duty
    assert_eq!(base.duty.raw(), 255);
    assert_eq!(plant.current_duty(), base.duty.raw());

    // the stock controller comes back even on the degraded path
    assert_eq!(plant.stop_calls(), 1);
    assert_eq!(plant.start_calls(), 1);
    assert_eq!(*service.subscribe_enabled().borrow(), false);
}

#[tokio::test]
async fn two_sessions_produce_identical_rows() {
    let run = || async {
        let config = Arc::new(base_config());
        let plant = cooling_plant(0.5, 1);
        let sink = Arc::new(MemorySink::new());
        let service = Service::new(config, plant, sink);
        service.enable(RunKind::Full).unwrap().await.unwrap()
    };

    let first = run().await;
    let second = run().await;

    assert_eq!(first.fopdt, second.fopdt);
    assert_eq!(first.gains, second.gains);
    assert!(!first.gains.is_empty());
}

#[tokio::test]
async fn busy_while_session_running() {
    let config = Arc::new(base_config());
    let plant = cooling_plant(0.5, 0);
    let sink = Arc::new(MemorySink::new());
    let service = Service::new(config, plant, sink);

    // current-thread runtime: the spawned session has not run yet, the
    // service is committed to it all the same
    let handle = service.enable(RunKind::Full).unwrap();
    let rejected = service.enable(RunKind::Full);
    match rejected {
        Err(e) => assert_eq!(e.kind(), ErrorKind::Busy),
        Ok(_) => panic!("second enable must be rejected"),
    }
    assert_eq!(*service.subscribe_enabled().borrow(), true);

    let outcome = handle.await.unwrap();
    assert!(!outcome.cancelled);

    // idle again: a new session is admitted
    let handle = service.enable(RunKind::Full).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn cancel_mid_step_emits_nothing() {
    let mut config = base_config();
    config.base_duty = None;
    config.fans[0].min_duty = 210;
    let config = Arc::new(config);

    let plant = settled_plant(5.0, 0);
    let sink = Arc::new(MemorySink::new());
    let service = Service::new(config, plant.clone(), sink.clone());

    // write #1 applies the start duty, write #2 the step; cancel five
    // samples after the step
    {
        let service = service.clone();
        plant.set_cancel_hook(2, 5, move || service.cancel());
    }

    let outcome = service.enable(RunKind::Step).unwrap().await.unwrap();
    assert!(outcome.cancelled);
    assert!(outcome.fopdt.is_none());
    assert!(outcome.gains.is_empty());

    // no hardware writes after the cancellation was observed
    assert_eq!(plant.writes_at_cancel(), Some(plant.writes()));
    assert!(sink.fopdt.lock().unwrap().is_empty());
    assert!(sink.pid.lock().unwrap().is_empty());

    // tenancy restored, property driven back to false
    assert_eq!(plant.stop_calls(), 1);
    assert_eq!(plant.start_calls(), 1);
    assert_eq!(*service.subscribe_enabled().borrow(), false);

    // a fresh enable starts cleanly with no carried-over state
    let outcome = service.enable(RunKind::Step).unwrap().await.unwrap();
    assert!(!outcome.cancelled);
    assert!(outcome.fopdt.is_some());
    assert_eq!(plant.stop_calls(), 2);
    assert_eq!(plant.start_calls(), 2);
}

#[tokio::test]
async fn cancel_during_base_duty_stops_writing() {
    let config = Arc::new(base_config());
    let plant = cooling_plant(0.5, 0);
    let sink = Arc::new(MemorySink::new());
    let service = Service::new(config, plant.clone(), sink.clone());

    // arm immediately (first write), cancel after 5 samples
    {
        let service = service.clone();
        plant.set_cancel_hook(1, 5, move || service.cancel());
    }

    let outcome = service.enable(RunKind::Full).unwrap().await.unwrap();
    assert!(outcome.cancelled);
    assert!(outcome.base_duty.is_none());
    assert!(outcome.fopdt.is_none());
    assert_eq!(plant.writes_at_cancel(), Some(plant.writes()));
    assert_eq!(plant.start_calls(), 1);
}

#[tokio::test]
async fn zero_step_offset_identifies_nothing() {
    let mut config = base_config();
    config.base_duty = None;
    config.fans[0].min_duty = 210;
    config.step_trigger = Some(StepTriggerConfig {
        step_duty: 0,
        log_path: None,
    });
    let config = Arc::new(config);

    let plant = settled_plant(1.0, 0);
    let sink = Arc::new(MemorySink::new());
    let service = Service::new(config, plant.clone(), sink.clone());

    let outcome = service.enable(RunKind::Step).unwrap().await.unwrap();
    assert!(!outcome.cancelled);
    assert!(outcome.fopdt.is_none(), "no step means no identification");
    assert!(outcome.gains.is_empty());
    assert!(sink.fopdt.lock().unwrap().is_empty());

    // invariants hold on the degraded path too
    assert_eq!(plant.stop_calls(), 1);
    assert_eq!(plant.start_calls(), 1);
}

#[tokio::test]
async fn missing_step_trigger_skips_identification() {
    let mut config = base_config();
    config.step_trigger = None;
    let config = Arc::new(config);

    let plant = cooling_plant(0.2, 0);
    let sink = Arc::new(MemorySink::new());
    let service = Service::new(config, plant.clone(), sink.clone());

    let outcome = service.enable(RunKind::Full).unwrap().await.unwrap();
    assert!(outcome.base_duty.is_some());
    assert!(outcome.fopdt.is_none());
    assert!(outcome.gains.is_empty());
    assert_eq!(plant.start_calls(), 1);
}

#[tokio::test]
async fn noise_profile_reports_window_stats() {
    let mut config = base_config();
    config.noise_profile = Some(pid_autotune::config::NoiseProfileConfig {
        sample_count: 50,
        poll_interval_s: 1,
        log_path: None,
    });
    let config = Arc::new(config);

    let plant = settled_plant(5.0, 0);
    let sink = Arc::new(MemorySink::new());
    let service = Service::new(config, plant.clone(), sink.clone());

    let outcome = service.enable(RunKind::Noise).unwrap().await.unwrap();
    let stats = outcome.noise.expect("noise stats reported");
    assert_eq!(stats.n, 50);
    // a noise run never touches the fans
    assert_eq!(plant.writes(), 0);
    assert_eq!(sink.noise.lock().unwrap().len(), 1);
    assert_eq!(plant.stop_calls(), 1);
    assert_eq!(plant.start_calls(), 1);
}

/// Synthetic noiseless FOPDT response: k=0.02 °C/%, tau=40 s, theta=5 s,
/// duty 100 -> 130 at t=10, 200 s of post-step data
fn e1_response() -> StepResponse {
    let k = 0.02;
    let tau = 40.0;
    let theta = 5.0;
    let y0 = 50.0;
    let du_pct = pwm_to_percent(130) - pwm_to_percent(100);
    let dy = k * du_pct;
    let t0 = 10.0;
    let samples = (0..210)
        .map(|i| {
            let t = f64::from(i);
            let (pwm, temp_c) = if t <= t0 {
                (Duty::new(100), y0)
            } else {
                let elapsed = t - t0 - theta;
                let y = if elapsed > 0.0 {
                    y0 + dy * (1.0 - (-elapsed / tau).exp())
                } else {
                    y0
                };
                (Duty::new(130), y)
            };
            Sample {
                t_index: i,
                temp_c,
                pwm,
            }
        })
        .collect();
    StepResponse {
        samples,
        start_duty: Duty::new(100),
        end_duty: Duty::new(130),
    }
}

#[test]
fn noiseless_identification_and_tuning() {
    let params = fopdt::identify(&e1_response(), 1.0).expect("identification succeeds");
    assert!(params.tau >= 36.0 && params.tau <= 44.0, "tau {}", params.tau);
    assert!(params.theta >= 4.0 && params.theta <= 6.0, "theta {}", params.theta);
    assert!(params.k >= 0.018 && params.k <= 0.022, "k {}", params.k);

    let results = imc::tune(&params, &[0.5, 1.0, 2.0]);
    assert_eq!(results.len(), 6);

    // K_c non-increasing within each rule as the factor grows
    let pid_kp: Vec<f64> = results
        .iter()
        .filter(|r| r.rule == TuningRule::Pid)
        .map(|r| r.gains.kp)
        .collect();
    let pi_kp: Vec<f64> = results
        .iter()
        .filter(|r| r.rule == TuningRule::ImprovedPi)
        .map(|r| r.gains.kp)
        .collect();
    assert_eq!(pid_kp.len(), 3);
    assert_eq!(pi_kp.len(), 3);
    for pair in pid_kp.windows(2) {
        assert!(pair[1] <= pair[0]);
    }
    for pair in pi_kp.windows(2) {
        assert!(pair[1] <= pair[0]);
    }
}
