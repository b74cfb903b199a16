//! On-disk calibration profile.

use std::path::{Path, PathBuf};

use tracing::info;

use hivewatch_types::CalibrationProfile;

use crate::error::{Error, Result};
use crate::util::write_atomic;

/// A calibration profile stored as a JSON file.
///
/// A missing file means the scale is uncalibrated. Writes are atomic, so a
/// crash during save leaves the previous profile intact.
#[derive(Debug, Clone)]
pub struct ProfileFile {
    path: PathBuf,
}

impl ProfileFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the profile. Returns `Ok(None)` if no profile has been saved.
    pub fn load(&self) -> Result<Option<CalibrationProfile>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let profile: CalibrationProfile = serde_json::from_slice(&bytes)?;
        Ok(Some(profile))
    }

    /// Persist a profile, replacing any previous one.
    ///
    /// Profiles that cannot convert (zero or non-finite reference unit) are
    /// refused.
    pub fn save(&self, profile: &CalibrationProfile) -> Result<()> {
        if !profile.is_usable() {
            return Err(Error::calibration_failed(format!(
                "refusing to save unusable profile (reference_unit={})",
                profile.reference_unit
            )));
        }
        let json = serde_json::to_vec_pretty(profile)?;
        write_atomic(&self.path, &json)?;
        info!("Saved calibration profile to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_uncalibrated() {
        let dir = tempfile::tempdir().unwrap();
        let file = ProfileFile::new(dir.path().join("calibration.json"));
        assert!(file.load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = ProfileFile::new(dir.path().join("cfg").join("calibration.json"));
        let profile = CalibrationProfile::new(21.5, -8342.0, 1000.0);

        file.save(&profile).unwrap();
        let loaded = file.load().unwrap().unwrap();
        assert_eq!(loaded.reference_unit, 21.5);
        assert_eq!(loaded.zero_offset, -8342.0);
        assert_eq!(loaded.known_weight_used, 1000.0);
    }

    #[test]
    fn test_unusable_profile_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let file = ProfileFile::new(dir.path().join("calibration.json"));

        let err = file
            .save(&CalibrationProfile::new(0.0, 100.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, Error::CalibrationFailed(_)));
        assert!(!file.path().exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        std::fs::write(&path, b"{\"reference_unit\": ").unwrap();

        let err = ProfileFile::new(path).load().unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
