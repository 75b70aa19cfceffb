use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::model::{CalibrationModel, InterpolationPolicy};
use crate::result::{Error, Result};

const FORMAT_VERSION: u32 = 1;

/// On-disk form of a computed calibration, stored as JSON.
///
/// Holds the error terms together with the standards and frequency grid that
/// produced them, so a model can be reused without measuring the kit again.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFile {
    pub format_version: u32,
    /// Policy the model is applied with when the file is loaded.
    #[serde(default)]
    pub policy: InterpolationPolicy,
    #[serde(default)]
    pub notes: Vec<String>,
    pub model: CalibrationModel,
}

impl CalibrationFile {
    pub fn new(model: CalibrationModel) -> Self {
        CalibrationFile {
            format_version: FORMAT_VERSION,
            policy: InterpolationPolicy::default(),
            notes: Vec::new(),
            model,
        }
    }

    pub fn with_policy(mut self, policy: InterpolationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json)?;
        info!(path = %path.display(), points = self.model.sweep().len(), "Saved calibration");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let file: CalibrationFile = serde_json::from_str(&text).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;
        if file.format_version != FORMAT_VERSION {
            return Err(Error::CalibrationVersion(file.format_version));
        }
        file.model.validate()?;
        info!(
            path = %path.display(),
            class = ?file.model.class(),
            points = file.model.sweep().len(),
            "Loaded calibration"
        );
        Ok(file)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::calibration::{CalibrationClass, Calibrator, Standard, StandardKind};
    use crate::network::{DataState, SParameterSet};
    use num::complex::Complex;

    fn model() -> CalibrationModel {
        let mut cal = Calibrator::new(CalibrationClass::OnePort);
        let raw = |v: f64| {
            SParameterSet::one_port(
                vec![1_000_000, 2_000_000],
                vec![Complex::new(v, 0.1); 2],
                DataState::Raw,
            )
            .unwrap()
        };
        cal.record_standard(Standard::ideal(StandardKind::Open), raw(0.9))
            .unwrap();
        cal.record_standard(Standard::ideal(StandardKind::Short), raw(-0.8))
            .unwrap();
        cal.record_standard(Standard::ideal(StandardKind::Load), raw(0.05))
            .unwrap();
        cal.compute_model().unwrap()
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cal.json");
        let file = CalibrationFile::new(model())
            .with_policy(InterpolationPolicy::Linear)
            .with_note("bench kit");
        file.save(&path).unwrap();

        let loaded = CalibrationFile::load(&path).unwrap();
        assert_eq!(loaded.notes, vec!["bench kit".to_string()]);
        assert_eq!(loaded.policy, InterpolationPolicy::Linear);
        assert_eq!(loaded.model.sweep(), file.model.sweep());
        assert_eq!(loaded.model.standards().len(), 3);
        for (a, b) in loaded
            .model
            .reflection_terms()
            .iter()
            .zip(file.model.reflection_terms())
        {
            assert!((a.e00 - b.e00).norm() < 1e-12);
            assert!((a.delta_e - b.delta_e).norm() < 1e-12);
        }
    }

    #[test]
    fn rejects_truncated_terms() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cal.json");
        CalibrationFile::new(model()).save(&path).unwrap();

        let mut json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        json["model"]["reflection"].as_array_mut().unwrap().pop();
        fs::write(&path, json.to_string()).unwrap();

        assert!(matches!(
            CalibrationFile::load(&path),
            Err(Error::LengthMismatch { .. })
        ));
    }

    #[test]
    fn rejects_transmission_terms_on_one_port_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cal.json");
        CalibrationFile::new(model()).save(&path).unwrap();

        let mut json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        json["model"]["transmission"] = serde_json::json!([
            { "e30": [0.0, 0.0], "e22": [0.0, 0.0], "e10e32": [1.0, 0.0] }
        ]);
        fs::write(&path, json.to_string()).unwrap();

        assert!(matches!(
            CalibrationFile::load(&path),
            Err(Error::LengthMismatch { expected: 0, actual: 1, .. })
        ));
    }

    #[test]
    fn rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cal.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(CalibrationFile::load(&path), Err(Error::Json { .. })));
    }
}
