use isp3a_core::error::BuildError;
use isp3a_core::handler::Disposition;
use isp3a_core::mocks::{NullEngine, ScriptedEngine};
use isp3a_core::{
    ControlError, ExposureLimits, ExposureSettings, GainCodeScale, LockRequests, LockState,
    Pipeline, SensorModel, SensorTimingDescriptor,
};
use isp3a_traits::{
    ColorCell, ColorGrid, Domain, Estimate, FrameStatistics, RawExposure, RawFocus, WeightGrid,
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
        color: ColorGrid::filled(15, 15, ColorCell::splat(90)).unwrap(),
        hist_weights: WeightGrid::filled(5, 5, 1).unwrap(),
        applied: None,
    }
}

#[rstest]
fn builder_missing_exposure_engine_yields_typed_build_error() {
    let err = Pipeline::builder()
        .with_white_balance_engine(NullEngine(Domain::WhiteBalance))
        .with_focus_engine(NullEngine(Domain::Focus))
        .try_build()
        .expect_err("should fail with MissingExposureEngine");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingExposureEngine) => {}
        other => panic!("expected MissingExposureEngine, got: {other:?}"),
    }
}

#[rstest]
fn builder_missing_focus_engine_yields_typed_build_error() {
    let err = Pipeline::builder()
        .with_exposure_engine(NullEngine(Domain::Exposure))
        .with_white_balance_engine(NullEngine(Domain::WhiteBalance))
        .try_build()
        .expect_err("should fail with MissingFocusEngine");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingFocusEngine)
    ));
}

#[rstest]
#[case(Domain::WhiteBalance, Domain::WhiteBalance, Domain::Focus)]
#[case(Domain::Exposure, Domain::Focus, Domain::Focus)]
#[case(Domain::Exposure, Domain::WhiteBalance, Domain::Exposure)]
fn builder_rejects_engine_in_wrong_slot(#[case] ae: Domain, #[case] awb: Domain, #[case] af: Domain) {
    let err = Pipeline::builder()
        .with_exposure_engine(NullEngine(ae))
        .with_white_balance_engine(NullEngine(awb))
        .with_focus_engine(NullEngine(af))
        .build()
        .expect_err("should fail with WrongDomain");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::WrongDomain(_))
    ));
}

#[rstest]
fn builder_rejects_nan_gain_limit() {
    let err = Pipeline::builder()
        .with_exposure_engine(NullEngine(Domain::Exposure))
        .with_white_balance_engine(NullEngine(Domain::WhiteBalance))
        .with_focus_engine(NullEngine(Domain::Focus))
        .with_exposure_settings(ExposureSettings {
            limits: ExposureLimits {
                analog_gain_max: Some(f64::NAN),
                ..ExposureLimits::default()
            },
            ..ExposureSettings::default()
        })
        .build()
        .expect_err("should fail with InvalidConfig");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(_))
    ));
}

#[test]
fn process_frame_without_sensor_timing_fails() {
    let mut p = Pipeline::builder()
        .with_exposure_engine(NullEngine(Domain::Exposure))
        .with_white_balance_engine(NullEngine(Domain::WhiteBalance))
        .with_focus_engine(NullEngine(Domain::Focus))
        .build()
        .unwrap();
    let err = p.process_frame(&frame(0), LockRequests::default()).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ControlError>(),
        Some(&ControlError::MissingSensorTiming)
    );
}

#[test]
fn every_frame_gets_all_three_outputs() {
    let ae = ScriptedEngine::new(
        Domain::Exposure,
        [Some(Estimate::Exposure(RawExposure {
            coarse_integration_time: 600,
            analog_gain_code: 4,
            converged: true,
        }))],
    );
    let af = ScriptedEngine::new(
        Domain::Focus,
        [Some(Estimate::Focus(RawFocus {
            next_lens_position: 12,
        }))],
    );
    let mut p = Pipeline::builder()
        .with_sensor_model(model())
        .with_exposure_engine(ae)
        .with_white_balance_engine(NullEngine(Domain::WhiteBalance))
        .with_focus_engine(af)
        .build()
        .unwrap();

    for id in 0..5 {
        let r = p.process_frame(&frame(id), LockRequests::default()).unwrap();
        assert_eq!(r.frame_id, id);
        assert_eq!(r.exposure.state.coarse_integration_time, 600);
        assert_eq!(r.focus.state.lens_position, 12);
        assert!(matches!(r.white_balance.disposition, Disposition::Fallback(_)));
    }
    assert_eq!(
        p.derive_locks(LockRequests::default()),
        (LockState::ConvergedUnlocked, LockState::Converging)
    );
    assert_eq!(
        p.derive_locks(LockRequests {
            exposure: true,
            white_balance: true
        }),
        (LockState::Locked, LockState::Locked)
    );
}
