use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use isp3a_core::handler::Disposition;
use isp3a_core::mocks::{FailingEngine, NullEngine, ScriptedEngine};
use isp3a_core::{
    ControlError, ConvergenceSpeed, ExposureHandler, ExposureSettings, GainCodeScale, LockState,
    MeteringWindow, SensorModel, SensorTimingDescriptor,
};
use isp3a_traits::{
    ColorCell, ColorGrid, Domain, Estimate, EstimationCapability, EstimationInput,
    FrameStatistics, RawExposure, RawFocus, WeightGrid,
};
use rstest::rstest;

fn model() -> SensorModel {
    SensorModel::new(SensorTimingDescriptor::IMX185_1080P30, GainCodeScale::IMX185).unwrap()
}

fn frame(id: u64) -> FrameStatistics {
    FrameStatistics {
        frame_id: id,
        image_width: 1920,
        image_height: 1080,
        color: ColorGrid::filled(15, 15, ColorCell::splat(100)).unwrap(),
        hist_weights: WeightGrid::filled(5, 5, 1).unwrap(),
        applied: None,
    }
}

fn ae(lines: u32, code: u32) -> Option<Estimate> {
    Some(Estimate::Exposure(RawExposure {
        coarse_integration_time: lines,
        analog_gain_code: code,
        converged: false,
    }))
}

fn handler(engine: impl EstimationCapability + 'static, settings: ExposureSettings) -> ExposureHandler {
    let h = ExposureHandler::new(Box::new(engine), settings);
    h.controls().set_sensor_model(model());
    h
}

#[test]
fn missing_sensor_timing_is_a_hard_error() {
    let mut h = ExposureHandler::new(Box::new(NullEngine(Domain::Exposure)), ExposureSettings::default());
    let err = h.analyze(&frame(0), LockState::Converging).unwrap_err();
    assert_eq!(err, ControlError::MissingSensorTiming);
}

#[test]
fn first_frame_without_output_emits_sensor_floor() {
    let mut h = handler(NullEngine(Domain::Exposure), ExposureSettings::default());
    let st = h.analyze(&frame(0), LockState::Converging).unwrap();
    assert_eq!(st.disposition, Disposition::Fallback(ControlError::NullEngineOutput));
    assert_eq!(st.state.coarse_integration_time, 1);
    assert_eq!(st.state.analog_gain_code, 0);
    assert!((st.state.analog_gain_multiplier - 1.0).abs() < 1e-9);
    // nothing was accepted
    assert_eq!(h.controls().current(), None);
}

#[test]
fn locked_and_unchanged_reuses_without_running_engine() {
    let engine = ScriptedEngine::new(Domain::Exposure, [ae(500, 10), ae(900, 20)]);
    let calls = engine.calls();
    let mut h = handler(engine, ExposureSettings::default());

    let first = h.analyze(&frame(0), LockState::Locked).unwrap();
    assert!(first.is_recomputed());
    assert_eq!(first.state.coarse_integration_time, 500);
    assert_eq!(first.state.analog_gain_code, 10);

    for id in 1..4 {
        let next = h.analyze(&frame(id), LockState::Locked).unwrap();
        assert_eq!(next.disposition, Disposition::Reused);
        assert_eq!(next.state, first.state);
    }
    assert_eq!(calls.load(Ordering::Relaxed), 1);
}

#[rstest]
#[case(LockState::Converging)]
#[case(LockState::ConvergedUnlocked)]
fn unlocked_always_recomputes(#[case] lock: LockState) {
    let engine = ScriptedEngine::new(Domain::Exposure, [ae(500, 0), ae(600, 0)]);
    let calls = engine.calls();
    let mut h = handler(engine, ExposureSettings::default());
    h.analyze(&frame(0), lock).unwrap();
    let st = h.analyze(&frame(1), lock).unwrap();
    assert!(st.is_recomputed());
    assert_eq!(st.state.coarse_integration_time, 600);
    assert_eq!(calls.load(Ordering::Relaxed), 2);
}

#[test]
fn ev_shift_change_under_lock_recomputes_once() {
    let engine = ScriptedEngine::new(Domain::Exposure, [ae(500, 0), ae(700, 0)]);
    let calls = engine.calls();
    let mut h = handler(engine, ExposureSettings::default());
    h.analyze(&frame(0), LockState::Locked).unwrap();

    h.controls().set_ev_shift(1.0);
    let changed = h.analyze(&frame(1), LockState::Locked).unwrap();
    assert!(changed.is_recomputed());
    assert_eq!(changed.state.coarse_integration_time, 700);

    let after = h.analyze(&frame(2), LockState::Locked).unwrap();
    assert_eq!(after.disposition, Disposition::Reused);
    assert_eq!(calls.load(Ordering::Relaxed), 2);
}

#[test]
fn ev_shift_change_is_retried_after_missing_output() {
    let engine = ScriptedEngine::new(Domain::Exposure, [ae(500, 0), None, ae(700, 0)]);
    let calls = engine.calls();
    let mut h = handler(engine, ExposureSettings::default());
    h.analyze(&frame(0), LockState::Locked).unwrap();

    h.controls().set_ev_shift(1.0);
    let failed = h.analyze(&frame(1), LockState::Locked).unwrap();
    assert_eq!(failed.disposition, Disposition::Fallback(ControlError::NullEngineOutput));
    assert_eq!(failed.state.coarse_integration_time, 500);

    let retried = h.analyze(&frame(2), LockState::Locked).unwrap();
    assert!(retried.is_recomputed());
    assert_eq!(retried.state.coarse_integration_time, 700);
    assert_eq!(calls.load(Ordering::Relaxed), 3);

    assert_eq!(h.analyze(&frame(3), LockState::Locked).unwrap().disposition, Disposition::Reused);
}

#[test]
fn missing_output_re_emits_previous_state() {
    let engine = ScriptedEngine::new(Domain::Exposure, [ae(400, 5), None]);
    let mut h = handler(engine, ExposureSettings::default());
    let first = h.analyze(&frame(0), LockState::Converging).unwrap();
    let second = h.analyze(&frame(1), LockState::Converging).unwrap();
    assert_eq!(second.disposition, Disposition::Fallback(ControlError::NullEngineOutput));
    assert_eq!(second.state, first.state);
}

#[test]
fn engine_failure_falls_back() {
    let mut h = handler(FailingEngine(Domain::Exposure), ExposureSettings::default());
    let st = h.analyze(&frame(0), LockState::Converging).unwrap();
    assert!(matches!(st.disposition, Disposition::Fallback(ControlError::Engine(_))));
}

#[test]
fn estimate_for_another_domain_is_rejected() {
    let engine = ScriptedEngine::new(
        Domain::Exposure,
        [Some(Estimate::Focus(RawFocus {
            next_lens_position: 3,
        }))],
    );
    let mut h = handler(engine, ExposureSettings::default());
    let st = h.analyze(&frame(0), LockState::Converging).unwrap();
    assert!(matches!(st.disposition, Disposition::Fallback(ControlError::Engine(_))));
    assert_eq!(st.state.coarse_integration_time, 1);
}

#[test]
fn damping_halves_the_step_at_half_speed() {
    let engine = ScriptedEngine::new(Domain::Exposure, [ae(100, 0), ae(300, 0)]);
    let settings = ExposureSettings {
        speed: ConvergenceSpeed::new(0.5),
        ..ExposureSettings::default()
    };
    let mut h = handler(engine, settings);
    h.analyze(&frame(0), LockState::Converging).unwrap();
    let st = h.analyze(&frame(1), LockState::Converging).unwrap();
    assert_eq!(st.state.coarse_integration_time, 200);
    assert_eq!(st.state.analog_gain_code, 0);
}

#[test]
fn sensor_mode_change_forces_recompute_under_lock() {
    let engine = ScriptedEngine::new(Domain::Exposure, [ae(500, 0)]);
    let calls = engine.calls();
    let mut h = handler(engine, ExposureSettings::default());
    h.analyze(&frame(0), LockState::Locked).unwrap();
    assert!(h.controls().current().is_some());

    h.controls().set_sensor_model(model());
    assert_eq!(h.controls().current(), None);
    let st = h.analyze(&frame(1), LockState::Locked).unwrap();
    assert!(st.is_recomputed());
    assert_eq!(calls.load(Ordering::Relaxed), 2);
}

#[test]
fn windows_beyond_six_are_dropped() {
    let h = handler(NullEngine(Domain::Exposure), ExposureSettings::default());
    let w = MeteringWindow::new(0, 0, 99, 99, 1);
    h.controls().set_windows(&[w; 8]);
    assert_eq!(h.controls().windows().len(), 6);
}

/// Records the statistics each call sees.
struct Capture {
    seen: Arc<Mutex<Vec<FrameStatistics>>>,
}

impl EstimationCapability for Capture {
    fn domain(&self) -> Domain {
        Domain::Exposure
    }

    fn analyze(
        &mut self,
        input: &EstimationInput<'_>,
    ) -> Result<Option<Estimate>, Box<dyn std::error::Error + Send + Sync>> {
        self.seen.lock().unwrap().push(input.stats.clone());
        Ok(ae(500, 0))
    }
}

#[test]
fn engine_sees_weighted_grid_and_frame_is_untouched() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let settings = ExposureSettings {
        windows: vec![MeteringWindow::new(0, 0, 959, 1079, 5)],
        ..ExposureSettings::default()
    };
    let mut h = handler(
        Capture {
            seen: Arc::clone(&seen),
        },
        settings,
    );
    let f = frame(0);
    h.analyze(&f, LockState::Converging).unwrap();

    let seen = seen.lock().unwrap();
    let stats = &seen[0];
    assert_eq!(stats.color.get(0, 0).map(|c| c.avg_gr), Some(100));
    assert_eq!(stats.color.get(14, 0).map(|c| c.avg_gr), Some(100));
    // 384 px per weight cell: the window covers columns 0..3
    assert_eq!(stats.hist_weights.get(0, 0), Some(5));
    assert_eq!(stats.hist_weights.get(2, 4), Some(5));
    assert_eq!(stats.hist_weights.get(4, 0), Some(0));
    // the caller's frame still carries the raw statistics
    assert_eq!(f.hist_weights.get(4, 0), Some(1));
}

#[test]
fn controls_work_from_another_thread() {
    let h = handler(NullEngine(Domain::Exposure), ExposureSettings::default());
    let controls = h.controls();
    std::thread::spawn(move || controls.set_speed(0.25))
        .join()
        .unwrap();
    assert_eq!(h.controls().speed(), ConvergenceSpeed::new(0.25));
}
