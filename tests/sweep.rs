use std::time::Duration;

use num::complex::Complex;

use vna_core::derived::{self, TdrConfig};
use vna_core::device::{Connection, Dut, Fault, MockDevice};
use vna_core::frequency::{FrequencyRange, SweepSpacing};
use vna_core::sweep::{CalibrationStatus, SweepOutcome, SweepRequest, SweepWorker, WorkerSettings};

fn request(start: u64, stop: u64, points: usize) -> SweepRequest {
    SweepRequest::new(FrequencyRange::new(start, stop, points, SweepSpacing::Linear).unwrap())
}

#[tokio::test]
async fn long_sweep_is_split_without_gaps() {
    let device = MockDevice::with_firmware("0.7.3", "NanoVNA");
    let handle = device.handle();
    let conn = Connection::with_transport("mock", device, Duration::from_millis(100)).unwrap();
    let worker = SweepWorker::spawn(conn, WorkerSettings::default());

    // one dropped scan on the way is retried transparently
    handle.push_fault(Fault::Drop);
    let range = FrequencyRange::new(1_000_000, 250_000_000, 250, SweepSpacing::Linear).unwrap();
    let set = match worker.sweep(SweepRequest::new(range)).await.unwrap() {
        SweepOutcome::Complete(set) => set,
        other => panic!("unexpected {:?}", other),
    };

    let expected: Vec<u64> = (0..250).map(|i| range.point(i)).collect();
    assert_eq!(set.freqs(), expected.as_slice());

    let scans: Vec<String> = handle
        .commands()
        .into_iter()
        .filter(|c| c.starts_with("scan "))
        .collect();
    // three segments plus the retry of the first
    assert_eq!(scans.len(), 4);
    assert_eq!(scans[0], scans[1]);
    let points: Vec<usize> = scans[1..]
        .iter()
        .map(|c| c.split_whitespace().nth(3).unwrap().parse().unwrap())
        .collect();
    assert_eq!(points, vec![84, 83, 83]);

    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn cable_length_from_a_live_sweep() {
    let device = MockDevice::new();
    let handle = device.handle();
    handle.set_dut(Dut::Cable {
        length_m: 1.5,
        velocity_factor: 0.66,
        termination: Complex::new(1., 0.),
    });
    let conn = Connection::with_transport("mock", device, Duration::from_millis(100)).unwrap();
    let worker = SweepWorker::spawn(conn, WorkerSettings::default());
    let mut updates = worker.subscribe();

    worker.sweep(request(0, 300_000_000, 301)).await.unwrap();
    updates.changed().await.unwrap();
    let snapshot = updates.borrow().clone().unwrap();
    assert_eq!(snapshot.calibration, CalibrationStatus::Uncalibrated);

    let s11 = snapshot.data.s11().unwrap().to_vec();
    let config = TdrConfig {
        velocity_factor: 0.66,
        ..TdrConfig::default()
    };
    let result = derived::analyze(snapshot.data.freqs(), &s11, &config).unwrap();
    assert!(
        (result.cable_length_m - 1.5).abs() < result.distance[1],
        "{}",
        result.cable_length_m
    );
    // lossless open line: total reflection everywhere
    assert!(s11.iter().all(|g| (g.norm() - 1.).abs() < 1e-6));

    worker.shutdown().await.unwrap();
}
