//! `vna` command-line front end.
//!
//! ```bash
//! vna ports
//! vna info
//! vna sweep --start 1MHz --stop 30MHz --points 401 --cal kit.json --out antenna.s1p
//! vna calibrate --start 1MHz --stop 30MHz --points 401 --out kit.json
//! vna analyze antenna.s1p --tdr --cable RG-58
//! ```
//!
//! `--simulate` replaces the serial device with the built-in mock analyzer,
//! which answers sweeps through a typical uncalibrated front end.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use vna_core::calibration::{
    CalibrationClass, CalibrationFile, CalibrationModel, Calibrator, InterpolationPolicy, Standard,
    StandardKind,
};
use vna_core::config::{VnaConfig, DEFAULT_CONFIG_FILE};
use vna_core::derived::{self, TdrConfig, TdrMode, Window};
use vna_core::device::{Connection, Dut, ErrorBox, MockDevice, MockHandle, Transport};
use vna_core::frequency::{parse_frequency, FreqUnit, FrequencyRange, SweepSpacing};
use vna_core::sweep::{CancelPolicy, SweepOutcome, SweepRequest, SweepWorker, WorkerSettings};
use vna_core::touchstone::{ParamFormat, Touchstone, TouchstoneOptions};
use vna_core::{logging, SParam, SParameterSet, Sweep};

#[derive(Parser)]
#[command(name = "vna", version)]
#[command(about = "Sweep, calibrate and analyze with a NanoVNA", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Serial port, overriding the configured one
    #[arg(long, global = true)]
    port: Option<String>,

    /// Talk to a simulated analyzer instead of a serial device
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List USB serial ports, NanoVNAs first
    Ports,

    #[command(flatten)]
    Device(DeviceCommand),

    /// Print derived quantities of a Touchstone file
    Analyze {
        /// `.s1p` or `.s2p` file
        file: PathBuf,

        /// Also run a time-domain transform of S11
        #[arg(long)]
        tdr: bool,

        /// Bandpass instead of lowpass transform
        #[arg(long)]
        bandpass: bool,

        /// hann, blackman, kaiser or kaiser:<beta>
        #[arg(long, default_value = "hann")]
        window: Window,

        /// Velocity factor of the line under test
        #[arg(long, conflicts_with = "cable")]
        velocity_factor: Option<f64>,

        /// Cable type to look the velocity factor up for, e.g. RG-58
        #[arg(long)]
        cable: Option<String>,
    },
}

/// Commands that talk to an analyzer.
#[derive(Subcommand)]
enum DeviceCommand {
    /// Identify the connected device
    Info,

    /// Measure and write a Touchstone file
    Sweep {
        #[command(flatten)]
        range: RangeArgs,

        /// Sweeps averaged per result
        #[arg(long)]
        averages: Option<usize>,

        /// Calibration to correct the measurement with
        #[arg(long)]
        cal: Option<PathBuf>,

        /// Data format of the written file (RI, MA or DB)
        #[arg(long, default_value = "RI")]
        format: ParamFormat,

        /// Output file; standard output when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Measure the calibration standards and save the error model
    Calibrate {
        #[command(flatten)]
        range: RangeArgs,

        /// Add through and isolation for forward transmission
        #[arg(long)]
        two_port: bool,

        /// Allow correction between calibrated frequencies
        #[arg(long)]
        interpolate: bool,

        /// Free-form note stored with the calibration
        #[arg(long)]
        note: Option<String>,

        /// Calibration file to write
        #[arg(long)]
        out: PathBuf,
    },
}

/// Frequency span; unset values fall back to the configuration.
#[derive(Args, Clone, Copy, Debug)]
struct RangeArgs {
    /// Start frequency, e.g. 1MHz
    #[arg(long, value_parser = parse_hz)]
    start: Option<u64>,

    /// Stop frequency, e.g. 900MHz
    #[arg(long, value_parser = parse_hz)]
    stop: Option<u64>,

    /// Number of points
    #[arg(long)]
    points: Option<usize>,

    /// Logarithmic segment spacing
    #[arg(long)]
    log: bool,
}

fn parse_hz(text: &str) -> std::result::Result<u64, String> {
    parse_frequency(text).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = VnaConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    logging::init(&config.logging).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Ports => ports(),
        Commands::Analyze {
            file,
            tdr,
            bandpass,
            window,
            velocity_factor,
            cable,
        } => {
            let velocity_factor = match (velocity_factor, cable) {
                (Some(vf), _) => vf,
                (None, Some(name)) => derived::tdr::cable_velocity_factor(&name)
                    .with_context(|| format!("no velocity factor known for cable '{}'", name))?,
                (None, None) => TdrConfig::default().velocity_factor,
            };
            let config = tdr.then(|| TdrConfig {
                mode: if bandpass { TdrMode::Bandpass } else { TdrMode::Lowpass },
                window,
                velocity_factor,
                ..TdrConfig::default()
            });
            analyze(&file, config)
        }
        Commands::Device(command) if cli.simulate => {
            let device = MockDevice::new().with_error_box(ErrorBox::typical());
            let handle = device.handle();
            handle.set_dut(Dut::Cable {
                length_m: 3.,
                velocity_factor: 0.66,
                termination: num::complex::Complex::new(0.2, 0.1),
            });
            let timeout = config.serial.read_timeout();
            let connection = tokio::task::spawn_blocking(move || {
                Connection::with_transport("simulated", device, timeout)
            })
            .await??;
            run_device(command, connection, &config, Some(handle)).await
        }
        Commands::Device(command) => {
            let connection = open_serial(&config).await?;
            run_device(command, connection, &config, None).await
        }
    }
}

#[cfg(feature = "serial")]
async fn open_serial(config: &VnaConfig) -> Result<Connection<Box<dyn serialport::SerialPort>>> {
    let settings = config.serial.clone();
    let port = settings.port.clone();
    tokio::task::spawn_blocking(move || Connection::open(&settings.port, &settings))
        .await?
        .with_context(|| format!("opening {}", port))
}

#[cfg(feature = "serial")]
fn ports() -> Result<()> {
    let ports = vna_core::device::available_ports()?;
    if ports.is_empty() {
        println!("no USB serial ports found");
    }
    for port in ports {
        println!(
            "{:<20} {:04x}:{:04x}  {}{}",
            port.name,
            port.vid,
            port.pid,
            port.product.as_deref().unwrap_or("-"),
            if port.is_nanovna() { "  (NanoVNA)" } else { "" }
        );
    }
    Ok(())
}

#[cfg(not(feature = "serial"))]
fn ports() -> Result<()> {
    bail!("built without serial support")
}

#[cfg(not(feature = "serial"))]
async fn open_serial(_config: &VnaConfig) -> Result<Connection<MockDevice>> {
    bail!("built without serial support, use --simulate")
}

async fn run_device<T: Transport + 'static>(
    command: DeviceCommand,
    connection: Connection<T>,
    config: &VnaConfig,
    mock: Option<MockHandle>,
) -> Result<()> {
    let settings = WorkerSettings {
        cancel_policy: CancelPolicy::ReturnPartial,
        ..WorkerSettings::from(&config.sweep)
    };
    let worker = SweepWorker::spawn(connection, settings);

    let result = match command {
        DeviceCommand::Info => {
            let info = worker.device_info().await;
            println!("board:      {}", info.board);
            println!("firmware:   {}", info.version);
            println!("max points: {}", info.max_points);
            println!("ports:      {}", info.ports);
            println!("scan mode:  {:?}", info.scan_mode);
            Ok(())
        }
        DeviceCommand::Sweep {
            range,
            averages,
            cal,
            format,
            out,
        } => {
            let calibration = cal
                .as_deref()
                .or(config.calibration.file.as_deref())
                .map(|path| {
                    CalibrationFile::load(path)
                        .with_context(|| format!("loading calibration {}", path.display()))
                })
                .transpose()?;
            let default_range = calibration.as_ref().map(|file| file.model.sweep());
            let request = SweepRequest::new(resolve_range(range, config, default_range)?)
                .with_averages(averages.unwrap_or(config.sweep.averages));
            sweep(&worker, request, calibration, format, out.as_deref()).await
        }
        DeviceCommand::Calibrate {
            range,
            two_port,
            interpolate,
            note,
            out,
        } => {
            let class = if two_port {
                CalibrationClass::TwoPort
            } else {
                CalibrationClass::OnePort
            };
            let policy = if interpolate {
                InterpolationPolicy::Linear
            } else {
                config.calibration.interpolation
            };
            let request = SweepRequest::new(resolve_range(range, config, None)?)
                .with_averages(config.sweep.averages);
            let model = calibrate(&worker, request, class, mock.as_ref()).await?;
            let mut file = CalibrationFile::new(model).with_policy(policy);
            if let Some(note) = note {
                file = file.with_note(note);
            }
            file.save(&out)
                .with_context(|| format!("writing calibration {}", out.display()))?;
            println!("calibration saved to {}", out.display());
            Ok(())
        }
    };

    worker.shutdown().await.context("stopping sweep worker")?;
    result
}

fn resolve_range(args: RangeArgs, config: &VnaConfig, calibrated: Option<&Sweep>) -> Result<FrequencyRange> {
    let (start, stop, points) = match calibrated {
        Some(sweep) => (sweep.start(), sweep.stop(), sweep.len()),
        None => (config.sweep.start_hz, config.sweep.stop_hz, config.sweep.points),
    };
    let spacing = if args.log {
        SweepSpacing::Logarithmic
    } else {
        config.sweep.spacing
    };
    FrequencyRange::new(
        args.start.unwrap_or(start),
        args.stop.unwrap_or(stop),
        args.points.unwrap_or(points),
        spacing,
    )
    .context("invalid sweep range")
}

/// Runs one sweep, stopping after the current segment on Ctrl-C.
async fn measure<T: Transport + 'static>(
    worker: &SweepWorker<T>,
    request: SweepRequest,
) -> Result<SParameterSet> {
    let sweep = worker.sweep(request);
    tokio::pin!(sweep);
    let outcome = tokio::select! {
        outcome = &mut sweep => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping after the current segment");
            worker.cancel();
            sweep.await
        }
    };
    match outcome.context("sweep failed")? {
        SweepOutcome::Complete(set) => Ok(set),
        SweepOutcome::Cancelled { partial: Some(set) } => {
            warn!(points = set.len(), "Sweep cancelled, keeping the points measured so far");
            Ok(set)
        }
        SweepOutcome::Cancelled { partial: None } => bail!("sweep cancelled before any data arrived"),
    }
}

async fn sweep<T: Transport + 'static>(
    worker: &SweepWorker<T>,
    request: SweepRequest,
    calibration: Option<CalibrationFile>,
    format: ParamFormat,
    out: Option<&Path>,
) -> Result<()> {
    let info = worker.device_info().await;
    let raw = measure(worker, request).await?;

    let (set, note) = match &calibration {
        Some(file) => {
            let corrected = file
                .model
                .apply(&raw, file.policy)
                .context("calibration does not match this sweep")?;
            (corrected, "corrected")
        }
        None => (raw, "uncorrected"),
    };

    let document = Touchstone::from_network(
        set,
        TouchstoneOptions {
            unit: FreqUnit::MHz,
            param_format: format,
            ..TouchstoneOptions::default()
        },
    )
    .with_comment(format!("{} firmware {}", info.board, info.version))
    .with_comment(format!("{} measurement", note));

    match out {
        Some(path) => {
            document
                .write(path)
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), points = document.network().len(), "Sweep saved");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(document.serialize().as_bytes())?;
        }
    }
    Ok(())
}

async fn calibrate<T: Transport + 'static>(
    worker: &SweepWorker<T>,
    request: SweepRequest,
    class: CalibrationClass,
    mock: Option<&MockHandle>,
) -> Result<CalibrationModel> {
    let mut calibrator = Calibrator::new(class);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    for &kind in class.required() {
        let name = format!("{:?}", kind).to_uppercase();
        match mock {
            Some(handle) => handle.set_dut(standard_dut(kind)),
            None => {
                match kind {
                    StandardKind::Through => println!("Connect port 1 to port 2 and press Enter"),
                    StandardKind::Isolation => {
                        println!("Terminate both ports with loads and press Enter")
                    }
                    _ => println!("Connect {} to port 1 and press Enter", name),
                }
                if stdin.next_line().await?.is_none() {
                    bail!("calibration aborted");
                }
            }
        }
        let raw = measure(worker, request).await?;
        if raw.len() != request.range.npoints {
            bail!("{} measurement was interrupted", name);
        }
        if kind == StandardKind::Through {
            // port-1 reflection of the through gives the port-2 load match
            calibrator
                .record_standard(Standard::ideal(StandardKind::ThroughReflect), raw.clone())
                .context("recording through reflection")?;
        }
        calibrator
            .record_standard(Standard::ideal(kind), raw)
            .with_context(|| format!("recording {}", name))?;
        println!("{} measured", name);
    }

    let model = calibrator.compute_model().context("solving the error model")?;
    Ok(model)
}

fn standard_dut(kind: StandardKind) -> Dut {
    match kind {
        StandardKind::Open => Dut::Open,
        StandardKind::Short => Dut::Short,
        StandardKind::Load => Dut::Load,
        StandardKind::Through | StandardKind::ThroughReflect => Dut::Through,
        StandardKind::Isolation => Dut::Isolation,
    }
}

fn analyze(path: &Path, tdr: Option<TdrConfig>) -> Result<()> {
    let document = Touchstone::from_path(path).with_context(|| format!("reading {}", path.display()))?;
    let set = document.network();
    let freqs = set.freqs();
    let z0 = set.z0();
    let s11 = set.s11().context("file has no S11 data")?.to_vec();
    let s21 = set.get(SParam::S21).map(|values| values.to_vec());
    let delay = match &s21 {
        Some(values) => derived::group_delay(freqs, values),
        None => derived::group_delay(freqs, &s11),
    }
    .ok();

    println!(
        "{:>14} {:>9} {:>8} {:>22} {:>14}{}",
        "freq (MHz)",
        "RL (dB)",
        "VSWR",
        "Z (ohm)",
        "delay (ns)",
        if s21.is_some() { "   S21 (dB)" } else { "" }
    );
    for (i, (&freq, &gamma)) in freqs.iter().zip(&s11).enumerate() {
        let z = match derived::impedance(gamma, z0) {
            Some(z) => format!("{:.2}{:+.2}j", z.re, z.im),
            None => "open".to_string(),
        };
        let delay = delay
            .as_ref()
            .map_or(f64::NAN, |delay| delay[i] * 1e9);
        print!(
            "{:>14.6} {:>9.2} {:>8.3} {:>22} {:>14.3}",
            FreqUnit::MHz.from_hz(freq),
            derived::return_loss_db(gamma),
            derived::vswr(gamma),
            z,
            delay
        );
        if let Some(s21) = &s21 {
            print!(" {:>10.2}", derived::s21_gain_db(s21[i]));
        }
        println!();
    }

    if let Some(config) = tdr {
        let result = derived::analyze(freqs, &s11, &config).context("time-domain transform")?;
        println!();
        println!(
            "TDR ({:?}, {} window, vf {}): strongest reflection at {:.3} m",
            config.mode, config.window, config.velocity_factor, result.cable_length_m
        );
        if let Some(impedance) = &result.step_impedance {
            println!("impedance just past the discontinuity: {:.1} ohm", impedance[result.peak_index]);
        }
    }
    Ok(())
}
