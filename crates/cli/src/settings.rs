use std::fs;
use std::path::Path;

use framegrab_core::capture::domain::capture_config::CaptureConfig;
use framegrab_core::shared::resolution::Resolution;

/// Builds the capture config from an optional JSON file plus CLI overrides.
///
/// Flags win over file values. A source id must come from one of the two.
pub fn resolve(
    config_path: Option<&Path>,
    source: Option<&str>,
    size: Option<Resolution>,
) -> Result<CaptureConfig, Box<dyn std::error::Error>> {
    let base = match config_path {
        Some(path) => Some(load(path)?),
        None => None,
    };

    let mut config = match (base, source) {
        (Some(config), Some(source)) => config.with_source_id(source),
        (Some(config), None) => config,
        (None, Some(source)) => CaptureConfig::new(source),
        (None, None) => return Err("A video source is required (argument or --config)".into()),
    };

    if let Some(size) = size {
        config = config.with_resolution(size);
    }
    Ok(config)
}

fn load(path: &Path) -> Result<CaptureConfig, Box<dyn std::error::Error>> {
    let json = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
    let config = serde_json::from_str(&json)
        .map_err(|e| format!("Invalid config {}: {e}", path.display()))?;
    Ok(config)
}
