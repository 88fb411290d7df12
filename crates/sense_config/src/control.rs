//! Control-file polling: a tiny JSON file the orchestrator checks once per
//! tick to pause or resume the pipeline without a restart.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_CONTROL_PATH: &str = "/tmp/sense-control.json";

#[derive(Debug, Deserialize)]
struct ControlFile {
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Returns whether the pipeline should keep running. Missing or malformed
/// control files are treated as enabled, so a bad write never wedges the
/// pipeline off.
pub fn is_enabled(path: &Path) -> bool {
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<ControlFile>(&raw) {
            Ok(ctrl) => ctrl.enabled,
            Err(err) => {
                warn!(?path, "malformed control file ({err}), treating as enabled");
                true
            }
        },
        Err(_) => true,
    }
}

pub fn default_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONTROL_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sense-control-test-{}-{name}", std::process::id()))
    }

    #[test]
    fn missing_file_is_enabled() {
        assert!(is_enabled(Path::new("/nonexistent/sense-control.json")));
    }

    #[test]
    fn malformed_file_is_enabled() {
        let path = tmp_path("malformed.json");
        File::create(&path).unwrap().write_all(b"not json").unwrap();
        assert!(is_enabled(&path));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn explicit_disabled_is_honored() {
        let path = tmp_path("disabled.json");
        File::create(&path)
            .unwrap()
            .write_all(br#"{"enabled": false}"#)
            .unwrap();
        assert!(!is_enabled(&path));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn explicit_enabled_is_honored() {
        let path = tmp_path("enabled.json");
        File::create(&path)
            .unwrap()
            .write_all(br#"{"enabled": true}"#)
            .unwrap();
        assert!(is_enabled(&path));
        let _ = fs::remove_file(&path);
    }
}
