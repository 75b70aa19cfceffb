//! Touchstone (`.s1p` / `.s2p`) reader and writer.
//!
//! Frequencies are kept in Hz inside the [`SParameterSet`]; the option line's
//! unit only matters when text is produced or consumed. Every malformed line
//! is reported with its 1-based line number and nothing is returned for a
//! file that failed to parse.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use num::Complex;
use tracing::debug;

use crate::frequency::FreqUnit;
use crate::network::{DataState, SParam, SParameterSet, Sweep};
use crate::result::{Error, Result};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ParamType {
    S,
    Y,
    Z,
    G,
    H,
}

impl FromStr for ParamType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        use ParamType::*;
        match s {
            "s" | "S" => Ok(S),
            "y" | "Y" => Ok(Y),
            "z" | "Z" => Ok(Z),
            "g" | "G" => Ok(G),
            "h" | "H" => Ok(H),
            _ => Err(format!("unknown parameter type '{}'", s)),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ParamFormat {
    DBAngle,
    MagAngle,
    RealImag,
}

impl ParamFormat {
    fn to_complex(self, a: f64, b: f64) -> Complex<f64> {
        use ParamFormat::*;
        match self {
            RealImag => Complex::new(a, b),
            MagAngle => Complex::from_polar(a, b.to_radians()),
            DBAngle => Complex::from_polar(10f64.powf(a / 20.), b.to_radians()),
        }
    }

    fn from_complex(self, c: Complex<f64>) -> (f64, f64) {
        use ParamFormat::*;
        match self {
            RealImag => (c.re, c.im),
            MagAngle => (c.norm(), c.arg().to_degrees()),
            DBAngle => (20. * c.norm().log10(), c.arg().to_degrees()),
        }
    }
}

impl FromStr for ParamFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        use ParamFormat::*;
        match s {
            "db" | "DB" => Ok(DBAngle),
            "ma" | "MA" => Ok(MagAngle),
            "ri" | "RI" => Ok(RealImag),
            _ => Err(format!("unknown data format '{}'", s)),
        }
    }
}

impl fmt::Display for ParamFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ParamFormat::DBAngle => "DB",
            ParamFormat::MagAngle => "MA",
            ParamFormat::RealImag => "RI",
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TouchstoneOptions {
    pub unit: FreqUnit,
    pub param_type: ParamType,
    pub param_format: ParamFormat,
    pub resistance: f64,
}

impl Default for TouchstoneOptions {
    fn default() -> Self {
        TouchstoneOptions {
            unit: FreqUnit::GHz,
            param_type: ParamType::S,
            param_format: ParamFormat::MagAngle,
            resistance: 50.,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Touchstone {
    pub comments: Vec<String>,
    pub options: TouchstoneOptions,
    network: SParameterSet,
}

impl Touchstone {
    /// Wraps a data set for export. `options.resistance` is taken from the set.
    pub fn from_network(network: SParameterSet, mut options: TouchstoneOptions) -> Self {
        options.resistance = network.z0();
        options.param_type = ParamType::S;
        Touchstone {
            comments: Vec::new(),
            options,
            network,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comments.push(comment.into());
        self
    }

    pub fn network(&self) -> &SParameterSet {
        &self.network
    }

    pub fn into_network(self) -> SParameterSet {
        self.network
    }

    pub fn nports(&self) -> usize {
        self.network.nports()
    }

    /// Reads a file, taking the port count from its `.sNp` extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let nports = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .and_then(|e| {
                e.strip_prefix('s')
                    .and_then(|e| e.strip_suffix('p'))
                    .and_then(|n| n.parse::<usize>().ok())
            })
            .ok_or_else(|| Error::format(0, format!("{:?} is not an .sNp file", path)))?;
        let text = fs::read_to_string(path)?;
        let touchstone = Touchstone::parse(&text, nports)?;
        debug!(path = %path.display(), points = touchstone.network.len(), "Read touchstone file");
        Ok(touchstone)
    }

    pub fn parse(text: &str, nports: usize) -> Result<Self> {
        if nports != 1 && nports != 2 {
            return Err(Error::format(
                0,
                format!("{}-port files are not supported", nports),
            ));
        }
        let fields_per_line = 1 + 2 * nports * nports;

        let mut comments = Vec::new();
        let mut options = TouchstoneOptions::default();
        let mut options_read = false;
        let mut freqs: Vec<u64> = Vec::new();
        let mut columns: Vec<Vec<Complex<f64>>> = vec![Vec::new(); nports * nports];

        for (index, raw_line) in text.lines().enumerate() {
            let lineno = index + 1;
            let line = match raw_line.find('!') {
                Some(idx) => {
                    let comment = raw_line[idx + 1..].trim();
                    if raw_line[..idx].trim().is_empty() && !comment.is_empty() {
                        comments.push(comment.to_owned());
                    }
                    &raw_line[..idx]
                }
                None => raw_line,
            };
            let line = line.trim();

            if line.is_empty() {
                continue;
            }

            if line.starts_with('#') {
                if options_read {
                    return Err(Error::format(lineno, "duplicate option line"));
                }
                options = parse_options_line(line).map_err(|m| Error::format(lineno, m))?;
                options_read = true;
            } else if line.starts_with('[') {
                return Err(Error::format(
                    lineno,
                    "Touchstone 2.0 keywords are not supported",
                ));
            } else {
                let values = line
                    .split_whitespace()
                    .map(|v| {
                        v.parse::<f64>()
                            .map_err(|_| Error::format(lineno, format!("non-numeric token '{}'", v)))
                    })
                    .collect::<Result<Vec<f64>>>()?;
                if values.len() != fields_per_line {
                    return Err(Error::format(
                        lineno,
                        format!(
                            "expected {} fields for a {}-port file, found {}",
                            fields_per_line,
                            nports,
                            values.len()
                        ),
                    ));
                }
                let freq = options.unit.to_hz(values[0]).ok_or_else(|| {
                    Error::format(lineno, format!("invalid frequency {}", values[0]))
                })?;
                if let Some(&last) = freqs.last() {
                    if freq <= last {
                        return Err(Error::format(
                            lineno,
                            "frequencies must be strictly increasing",
                        ));
                    }
                }
                freqs.push(freq);
                for (column, pair) in columns.iter_mut().zip(values[1..].chunks(2)) {
                    column.push(options.param_format.to_complex(pair[0], pair[1]));
                }
            }
        }

        if freqs.is_empty() {
            return Err(Error::format(text.lines().count(), "file contains no data lines"));
        }

        let sweep = Sweep::new(freqs)?;
        let mut network =
            SParameterSet::new(sweep, DataState::Corrected).with_z0(options.resistance);
        for (label, column) in SParam::ALL.iter().zip(columns) {
            network = network.with_param(*label, column)?;
        }

        Ok(Touchstone {
            comments,
            options,
            network,
        })
    }

    pub fn serialize(&self) -> String {
        self.to_string()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.serialize())?;
        debug!(path = %path.display(), points = self.network.len(), "Wrote touchstone file");
        Ok(())
    }
}

fn parse_options_line(line: &str) -> std::result::Result<TouchstoneOptions, String> {
    let mut options = TouchstoneOptions::default();
    let lowered = line.to_lowercase();
    let split_line: Vec<&str> = lowered.split_whitespace().skip(1).collect();
    let mut entries = split_line.iter().copied().peekable();
    while let Some(entry) = entries.next() {
        if entry.ends_with("hz") {
            options.unit = entry
                .parse()
                .map_err(|_| format!("unknown frequency unit '{}'", entry))?;
        } else if entry == "r" {
            let value = entries
                .next()
                .ok_or_else(|| "missing reference impedance after 'R'".to_string())?;
            options.resistance = value
                .parse::<f64>()
                .map_err(|_| format!("invalid reference impedance '{}'", value))?;
            if !(options.resistance.is_finite() && options.resistance > 0.) {
                return Err(format!(
                    "reference impedance must be positive, got {}",
                    options.resistance
                ));
            }
        } else if entry.len() == 2 {
            options.param_format = entry.parse()?;
        } else if entry.len() == 1 {
            options.param_type = entry.parse()?;
        } else {
            return Err(format!("unexpected option '{}'", entry));
        }
    }
    if options.param_type != ParamType::S {
        return Err(format!("{:?} parameters are not supported", options.param_type));
    }
    Ok(options)
}

impl fmt::Display for Touchstone {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for comment in &self.comments {
            writeln!(f, "! {}", comment)?;
        }
        writeln!(
            f,
            "# {} S {} R {}",
            self.options.unit, self.options.param_format, self.options.resistance
        )?;

        let labels: &[SParam] = if self.nports() == 1 {
            &[SParam::S11]
        } else {
            &SParam::ALL
        };
        for (i, &freq) in self.network.freqs().iter().enumerate() {
            write!(f, "{}", self.options.unit.from_hz(freq))?;
            for label in labels {
                let value = self
                    .network
                    .get(*label)
                    .map_or(Complex::new(0., 0.), |column| column[i]);
                let (a, b) = self.options.param_format.from_complex(value);
                write!(f, " {} {}", a, b)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const ONE_PORT: &str = "! NanoVNA export\n\
                            # MHz S RI R 50\n\
                            1.0 0.5 0.25\n\
                            2.5 -0.125 0.0 ! trailing comment\n\
                            \n\
                            4 0.0 -1.0\n";

    fn assert_close(a: Complex<f64>, b: Complex<f64>) {
        assert!((a - b).norm() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn test_simple_s1p() {
        let touchstone = Touchstone::parse(ONE_PORT, 1).unwrap();
        assert_eq!(touchstone.options.unit, FreqUnit::MHz);
        assert_eq!(touchstone.options.param_type, ParamType::S);
        assert_eq!(touchstone.options.param_format, ParamFormat::RealImag);
        assert_eq!(touchstone.comments, vec!["NanoVNA export".to_string()]);
        let net = touchstone.network();
        assert_eq!(net.freqs(), &[1_000_000, 2_500_000, 4_000_000]);
        assert_eq!(net.s11().unwrap()[1], Complex::new(-0.125, 0.0));
        assert_eq!(net.nports(), 1);
    }

    #[test]
    fn test_defaults_without_option_line() {
        let touchstone = Touchstone::parse("1 1 90\n", 1).unwrap();
        assert_eq!(touchstone.options, TouchstoneOptions::default());
        assert_eq!(touchstone.network().freqs(), &[1_000_000_000]);
        assert_close(touchstone.network().s11().unwrap()[0], Complex::new(0., 1.));
    }

    #[test]
    fn test_db_format() {
        let touchstone = Touchstone::parse("# Hz S DB R 75\n100 -6.020599913279624 180\n", 1).unwrap();
        assert_eq!(touchstone.options.resistance, 75.);
        assert_eq!(touchstone.network().z0(), 75.);
        assert_close(touchstone.network().s11().unwrap()[0], Complex::new(-0.5, 0.));
    }

    #[test]
    fn test_two_port_column_order() {
        let text = "# Hz S RI R 50\n10 1 0 2 0 3 0 4 0\n";
        let touchstone = Touchstone::parse(text, 2).unwrap();
        let net = touchstone.network();
        assert_eq!(net.get(SParam::S11).unwrap()[0].re, 1.);
        assert_eq!(net.get(SParam::S21).unwrap()[0].re, 2.);
        assert_eq!(net.get(SParam::S12).unwrap()[0].re, 3.);
        assert_eq!(net.get(SParam::S22).unwrap()[0].re, 4.);
    }

    #[test]
    fn test_non_numeric_token_names_line() {
        let text = "! header\n# MHz S RI R 50\n1 0.1 0.2\n2 0.1 abc\n3 0.1 0.2\n";
        match Touchstone::parse(text, 1) {
            Err(Error::Format { line, message }) => {
                assert_eq!(line, 4);
                assert!(message.contains("abc"));
            }
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_field_count() {
        let err = Touchstone::parse("# MHz S RI R 50\n1 0.1 0.2 0.3\n", 1).unwrap_err();
        assert!(matches!(err, Error::Format { line: 2, .. }));
    }

    #[test]
    fn test_bad_options() {
        assert!(matches!(
            Touchstone::parse("# MHz Z RI R 50\n1 0 0\n", 1),
            Err(Error::Format { line: 1, .. })
        ));
        assert!(matches!(
            Touchstone::parse("# MHz S RI R -5\n1 0 0\n", 1),
            Err(Error::Format { line: 1, .. })
        ));
        assert!(matches!(
            Touchstone::parse("# MHz S RI R 50\n# GHz\n1 0 0\n", 1),
            Err(Error::Format { line: 2, .. })
        ));
    }

    #[test]
    fn test_bad_unit_message() {
        match Touchstone::parse("# FHZ S RI R 50\n1 0 0\n", 1) {
            Err(Error::Format { line, message }) => {
                assert_eq!(line, 1);
                assert_eq!(message, "unknown frequency unit 'fhz'");
            }
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_increasing_frequency() {
        let err = Touchstone::parse("# Hz S RI R 50\n5 0 0\n5 0 0\n", 1).unwrap_err();
        assert!(matches!(err, Error::Format { line: 3, .. }));
    }

    #[test]
    fn test_serialize_roundtrip_ma() {
        let original = Touchstone::parse(ONE_PORT, 1).unwrap();
        let mut options = original.options;
        options.param_format = ParamFormat::MagAngle;
        options.unit = FreqUnit::KHz;
        let exported = Touchstone::from_network(original.network().clone(), options)
            .with_comment("exported");
        let text = exported.serialize();
        assert!(text.starts_with("! exported\n# KHZ S MA R 50\n"));

        let reparsed = Touchstone::parse(&text, 1).unwrap();
        assert_eq!(reparsed.network().freqs(), original.network().freqs());
        for (a, b) in reparsed
            .network()
            .s11()
            .unwrap()
            .iter()
            .zip(original.network().s11().unwrap().iter())
        {
            assert_close(*a, *b);
        }
    }
}
