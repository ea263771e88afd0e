use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::PluginError;

/// File name prefix every provider plugin executable carries.
pub const PLUGIN_PREFIX: &str = "snoozer-provider-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginCandidate {
    /// Suffix after the prefix, e.g. `aws` for `snoozer-provider-aws`.
    pub id: String,
    pub file_name: String,
    pub path: PathBuf,
}

/// Extracts the plugin id from a file name following the naming convention.
pub fn plugin_id_from_file_name(file_name: &str) -> Option<String> {
    let id = file_name.strip_prefix(PLUGIN_PREFIX)?;
    let id = id.strip_suffix(".exe").unwrap_or(id);
    if id.is_empty() || id.contains('.') {
        return None;
    }
    Some(id.to_string())
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    true
}

/// Scans `plugins_dir` for plugin executables, sorted by id. Binaries that
/// map to the same id (`snoozer-provider-aws` and `snoozer-provider-aws.exe`)
/// yield one candidate: the first by file name.
pub fn discover(plugins_dir: &Path) -> Result<Vec<PluginCandidate>, PluginError> {
    let entries = fs::read_dir(plugins_dir).map_err(|e| {
        PluginError::Discovery(format!("{}: {}", plugins_dir.display(), e))
    })?;

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let Some(id) = plugin_id_from_file_name(&file_name) else {
            continue;
        };

        let metadata = entry.metadata()?;
        if !metadata.is_file() || !is_executable(&metadata) {
            debug!(file = %file_name, "Skipping non-executable plugin candidate");
            continue;
        }

        candidates.push(PluginCandidate {
            id,
            file_name,
            path: entry.path(),
        });
    }

    candidates.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.file_name.cmp(&b.file_name)));

    let mut unique: Vec<PluginCandidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match unique.last() {
            Some(kept) if kept.id == candidate.id => warn!(
                plugin = %candidate.id,
                kept = %kept.file_name,
                skipped = %candidate.file_name,
                "Duplicate plugin id, skipping binary"
            ),
            _ => unique.push(candidate),
        }
    }
    Ok(unique)
}
