use std::path::PathBuf;

use num::complex::Complex;

use vna_core::derived::{self, TdrConfig};
use vna_core::frequency::FreqUnit;
use vna_core::touchstone::{ParamFormat, Touchstone, TouchstoneOptions};
use vna_core::{DataState, Error, SParam, SParameterSet};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name)
}

#[test]
fn dipole_s1p() {
    let touchstone = Touchstone::from_path(&fixture("dipole_40m.s1p")).unwrap();
    assert_eq!(touchstone.options.unit, FreqUnit::MHz);
    assert_eq!(touchstone.options.param_format, ParamFormat::RealImag);
    assert_eq!(touchstone.comments.len(), 2);
    assert_eq!(touchstone.nports(), 1);

    let net = touchstone.network();
    assert_eq!(net.len(), 41);
    assert_eq!(net.state(), DataState::Corrected);
    assert_eq!(net.freqs()[0], 6_000_000);
    assert_eq!(net.sweep().stop(), 8_000_000);

    // resonance: purely resistive 62 ohm feed point
    let s11 = net.s11().unwrap();
    let (best, _) = s11
        .iter()
        .map(|&g| derived::vswr(g))
        .enumerate()
        .fold((0, f64::INFINITY), |a, (i, v)| if v < a.1 { (i, v) } else { a });
    assert_eq!(net.freqs()[best], 7_050_000);
    assert!((derived::vswr(s11[best]) - 1.24).abs() < 1e-6);
    let z = derived::impedance(s11[best], net.z0()).unwrap();
    assert!((z - Complex::new(62., 0.)).norm() < 1e-3, "{}", z);
    assert!(derived::return_loss_db(s11[best]) > 19.);
}

#[test]
fn attenuator_s2p() {
    let touchstone = Touchstone::from_path(&fixture("attenuator_3db.s2p")).unwrap();
    assert_eq!(touchstone.options.unit, FreqUnit::GHz);
    assert_eq!(touchstone.options.param_format, ParamFormat::MagAngle);
    assert_eq!(touchstone.nports(), 2);

    let net = touchstone.network();
    assert_eq!(net.len(), 11);
    assert_eq!(net.freqs()[0], 100_000_000);
    let s21 = net.get(SParam::S21).unwrap().to_vec();
    for value in &s21 {
        assert!((derived::s21_gain_db(*value) + 3.).abs() < 1e-5);
    }
    // 0.5 ns line, including the wrap between the last two points
    for delay in derived::group_delay(net.freqs(), &s21).unwrap() {
        assert!((delay - 0.5e-9).abs() < 1e-15, "{}", delay);
    }
    assert!((net.get(SParam::S22).unwrap()[0].norm() - 0.02).abs() < 1e-12);
}

#[test]
fn corrupt_file_names_the_line() {
    match Touchstone::from_path(&fixture("corrupt.s1p")) {
        Err(Error::Format { line, message }) => {
            assert_eq!(line, 4);
            assert!(message.contains("O.03"), "{}", message);
        }
        other => panic!("expected a format error, got {:?}", other),
    }
}

#[test]
fn rejects_unknown_extension() {
    assert!(matches!(
        Touchstone::from_path(&fixture("dipole_40m.txt")),
        Err(Error::Format { line: 0, .. })
    ));
}

#[test]
fn write_and_read_back_two_port() {
    let original = Touchstone::from_path(&fixture("attenuator_3db.s2p")).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("copy.s2p");

    let options = TouchstoneOptions {
        unit: FreqUnit::MHz,
        param_format: ParamFormat::DBAngle,
        ..TouchstoneOptions::default()
    };
    Touchstone::from_network(original.network().clone(), options)
        .with_comment("re-exported")
        .write(&path)
        .unwrap();

    let copy = Touchstone::from_path(&path).unwrap();
    assert_eq!(copy.comments, vec!["re-exported".to_string()]);
    assert_eq!(copy.options.param_format, ParamFormat::DBAngle);
    assert_eq!(copy.network().freqs(), original.network().freqs());
    for label in SParam::ALL {
        let a = copy.network().get(label).unwrap();
        let b = original.network().get(label).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).norm() < 1e-9, "{}: {} != {}", label, x, y);
        }
    }
}

#[test]
fn open_ended_cable_tdr() {
    // 2 m of line with vf 0.7, open at the far end, harmonic grid from DC
    let length = 2.;
    let vf = 0.7;
    let c = 299_792_458.;
    let freqs: Vec<u64> = (0..301).map(|i| i * 1_000_000).collect();
    let s11: Vec<Complex<f64>> = freqs
        .iter()
        .map(|&f| Complex::from_polar(1., -4. * std::f64::consts::PI * f as f64 * length / (vf * c)))
        .collect();
    let set = SParameterSet::one_port(freqs.clone(), s11.clone(), DataState::Corrected).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cable.s1p");
    Touchstone::from_network(set, TouchstoneOptions::default())
        .write(&path)
        .unwrap();
    let reread = Touchstone::from_path(&path).unwrap();

    let config = TdrConfig {
        velocity_factor: vf,
        ..TdrConfig::default()
    };
    let result = derived::analyze(
        reread.network().freqs(),
        &reread.network().s11().unwrap().to_vec(),
        &config,
    )
    .unwrap();
    let resolution = result.distance[1];
    assert!((result.cable_length_m - length).abs() < resolution, "{}", result.cable_length_m);
}
