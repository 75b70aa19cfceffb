//! Calibrations measured against the simulated analyzer, through the whole
//! driver and sweep stack.

use std::time::Duration;

use num::complex::Complex;

use vna_core::calibration::{
    CalibrationClass, CalibrationFile, CalibrationModel, Calibrator, InterpolationPolicy, Standard,
    StandardKind,
};
use vna_core::device::{Connection, Dut, ErrorBox, MockDevice, MockHandle};
use vna_core::frequency::{FrequencyRange, SweepSpacing};
use vna_core::sweep::{CancelPolicy, CancelToken, SweepController, SweepOutcome, SweepPlan, SweepRequest};
use vna_core::{DataState, Error, SParameterSet};

struct Bench {
    connection: Connection<MockDevice>,
    handle: MockHandle,
}

impl Bench {
    fn new(firmware: &str, board: &str) -> Self {
        let device = MockDevice::with_firmware(firmware, board).with_error_box(ErrorBox::typical());
        let handle = device.handle();
        let connection =
            Connection::with_transport("bench", device, Duration::from_millis(100)).unwrap();
        Bench { connection, handle }
    }

    fn measure(&mut self, dut: Dut, start: u64, stop: u64, points: usize) -> SParameterSet {
        self.handle.set_dut(dut);
        let range = FrequencyRange::new(start, stop, points, SweepSpacing::Linear).unwrap();
        let plan = SweepPlan::new(
            SweepRequest::new(range),
            self.connection.info().max_points,
        )
        .unwrap();
        match SweepController::default()
            .run(&mut self.connection, &plan, &CancelToken::new(), CancelPolicy::Discard)
            .unwrap()
        {
            SweepOutcome::Complete(set) => set,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn calibrate(&mut self, class: CalibrationClass, start: u64, stop: u64, points: usize) -> CalibrationModel {
        let mut calibrator = Calibrator::new(class);
        for &kind in class.required() {
            let dut = match kind {
                StandardKind::Open => Dut::Open,
                StandardKind::Short => Dut::Short,
                StandardKind::Load => Dut::Load,
                StandardKind::Through => Dut::Through,
                _ => Dut::Isolation,
            };
            let raw = self.measure(dut, start, stop, points);
            if kind == StandardKind::Through {
                calibrator
                    .record_standard(Standard::ideal(StandardKind::ThroughReflect), raw.clone())
                    .unwrap();
            }
            calibrator.record_standard(Standard::ideal(kind), raw).unwrap();
        }
        calibrator.compute_model().unwrap()
    }
}

fn assert_close(a: Complex<f64>, b: Complex<f64>, tolerance: f64) {
    assert!((a - b).norm() < tolerance, "{} != {}", a, b);
}

#[test]
fn one_port_over_several_segments() {
    // 0.7.x firmware: text scans of at most 101 points
    let mut bench = Bench::new("0.7.3", "NanoVNA");
    let model = bench.calibrate(CalibrationClass::OnePort, 1_000_000, 150_000_000, 150);
    assert_eq!(model.sweep().len(), 150);
    assert!(model.transmission_terms().is_none());

    let z = Complex::new(25., 10.);
    let expected = (z - 50.) / (z + 50.);
    let raw = bench.measure(Dut::Impedance(z), 1_000_000, 150_000_000, 150);
    assert!((raw.s11().unwrap()[0] - expected).norm() > 1e-2);

    let corrected = model.apply(&raw, InterpolationPolicy::Exact).unwrap();
    assert_eq!(corrected.state(), DataState::Corrected);
    assert!(corrected.s21().is_none());
    for value in corrected.s11().unwrap() {
        assert_close(*value, expected, 1e-5);
    }

    assert!(matches!(
        model.apply(&corrected, InterpolationPolicy::Exact),
        Err(Error::AlreadyCorrected)
    ));
}

#[test]
fn two_port_attenuator() {
    let mut bench = Bench::new("1.2.27", "NanoVNA-H 4");
    let model = bench.calibrate(CalibrationClass::TwoPort, 10_000_000, 500_000_000, 50);
    assert!(model.transmission_terms().is_some());

    let s21 = Complex::from_polar(0.5, (-30f64).to_radians());
    let raw = bench.measure(Dut::Attenuator { s21 }, 10_000_000, 500_000_000, 50);
    let corrected = model.apply(&raw, InterpolationPolicy::Exact).unwrap();
    for (gamma, gain) in corrected
        .s11()
        .unwrap()
        .iter()
        .zip(corrected.s21().unwrap().iter())
    {
        assert_close(*gamma, Complex::new(0., 0.), 1e-5);
        assert_close(*gain, s21, 1e-4);
    }
}

#[test]
fn interpolated_between_calibrated_points() {
    let mut bench = Bench::new("1.2.27", "NanoVNA-H 4");
    let model = bench.calibrate(CalibrationClass::OnePort, 1_000_000, 10_000_000, 10);

    let gamma = Complex::new(-0.2, 0.4);
    let raw = bench.measure(Dut::Reflection(gamma), 1_500_000, 9_500_000, 9);
    assert!(matches!(
        model.apply(&raw, InterpolationPolicy::Exact),
        Err(Error::FrequencyMismatch { frequency: 1_500_000 })
    ));

    let corrected = model.apply(&raw, InterpolationPolicy::Linear).unwrap();
    for value in corrected.s11().unwrap() {
        assert_close(*value, gamma, 1e-4);
    }

    let beyond = bench.measure(Dut::Reflection(gamma), 5_000_000, 11_000_000, 7);
    assert!(matches!(
        model.apply(&beyond, InterpolationPolicy::Linear),
        Err(Error::FrequencyMismatch { .. })
    ));
}

#[test]
fn saved_calibration_corrects_later_sweeps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kit.json");

    let mut bench = Bench::new("1.2.27", "NanoVNA-H 4");
    let model = bench.calibrate(CalibrationClass::OnePort, 2_000_000, 30_000_000, 29);
    CalibrationFile::new(model)
        .with_note("SMA kit, port 1")
        .save(&path)
        .unwrap();

    let file = CalibrationFile::load(&path).unwrap();
    assert_eq!(file.policy, InterpolationPolicy::Exact);
    let raw = bench.measure(Dut::Short, 2_000_000, 30_000_000, 29);
    let corrected = file.model.apply(&raw, file.policy).unwrap();
    for value in corrected.s11().unwrap() {
        assert_close(*value, Complex::new(-1., 0.), 1e-5);
    }
}

#[test]
fn standard_from_another_sweep_is_rejected() {
    let mut bench = Bench::new("1.2.27", "NanoVNA-H 4");
    let mut calibrator = Calibrator::new(CalibrationClass::OnePort);
    calibrator
        .record_standard(
            Standard::ideal(StandardKind::Open),
            bench.measure(Dut::Open, 1_000_000, 2_000_000, 11),
        )
        .unwrap();
    calibrator
        .record_standard(
            Standard::ideal(StandardKind::Short),
            bench.measure(Dut::Short, 1_000_000, 2_000_000, 11),
        )
        .unwrap();
    assert!(matches!(
        calibrator.compute_model(),
        Err(Error::IncompleteCalibration { .. })
    ));
    calibrator
        .record_standard(
            Standard::ideal(StandardKind::Load),
            bench.measure(Dut::Load, 1_000_000, 3_000_000, 11),
        )
        .unwrap();
    assert!(matches!(
        calibrator.compute_model(),
        Err(Error::FrequencyMismatch { .. })
    ));
}
