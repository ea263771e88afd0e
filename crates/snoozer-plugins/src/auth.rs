use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::discovery::PluginCandidate;
use crate::PluginError;

/// Expected SHA-256 digests keyed by plugin file name.
///
/// On disk this is a flat JSON object:
/// `{ "snoozer-provider-aws": "9f86d08...", ... }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrustManifest {
    digests: HashMap<String, String>,
}

impl TrustManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, PluginError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PluginError::Manifest(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| PluginError::Manifest(format!("{}: {}", path.display(), e)))
    }

    pub fn with_entry(mut self, file_name: impl Into<String>, digest: impl Into<String>) -> Self {
        self.digests.insert(file_name.into(), digest.into());
        self
    }

    pub fn expected_digest(&self, file_name: &str) -> Option<&str> {
        self.digests.get(file_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

/// Hex encoded SHA-256 of a file's contents.
pub fn file_digest(path: &Path) -> Result<String, PluginError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn normalize_digest(digest: &str) -> String {
    let digest = digest.trim();
    let digest = digest.strip_prefix("sha256:").unwrap_or(digest);
    digest.to_ascii_lowercase()
}

/// Binary switch: either every candidate must match the manifest, or none is
/// checked at all.
#[derive(Debug, Clone)]
pub struct Authenticator {
    enabled: bool,
    manifest: TrustManifest,
}

impl Authenticator {
    pub fn enabled(manifest: TrustManifest) -> Self {
        Self {
            enabled: true,
            manifest,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            manifest: TrustManifest::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the candidate's digest when it could be computed.
    ///
    /// With authentication enabled a missing manifest entry, an unreadable
    /// binary or a mismatching digest all reject the candidate.
    pub fn authenticate(&self, candidate: &PluginCandidate) -> Result<Option<String>, PluginError> {
        if !self.enabled {
            return Ok(file_digest(&candidate.path).ok());
        }

        let reject = |reason: String| PluginError::AuthenticationFailed {
            plugin: candidate.id.clone(),
            reason,
        };

        let expected = self
            .manifest
            .expected_digest(&candidate.file_name)
            .ok_or_else(|| reject("no entry in trust manifest".to_string()))?;

        let actual = file_digest(&candidate.path).map_err(|e| reject(e.to_string()))?;

        if normalize_digest(expected) != actual {
            return Err(reject(format!(
                "digest mismatch (expected {}, found {})",
                normalize_digest(expected),
                actual
            )));
        }

        Ok(Some(actual))
    }
}
