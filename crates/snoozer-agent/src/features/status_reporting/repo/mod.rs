use std::collections::HashMap;
use std::path::PathBuf;

/// Metric name under which the CPU sample is reported.
pub const CPU_METRIC: &str = "cpu";

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("malformed load average '{0}'")]
    Malformed(String),
}

/// Source of the resource usage snapshot sent with heartbeats.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> Result<HashMap<String, f64>, SamplerError>;
}

/// One-minute load average divided by the number of CPUs, read from
/// `/proc/loadavg`.
pub struct LoadAverageSampler {
    path: PathBuf,
    cpus: f64,
}

impl LoadAverageSampler {
    pub fn new() -> Self {
        Self::with_path("/proc/loadavg")
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            path: path.into(),
            cpus: cpus as f64,
        }
    }
}

impl Default for LoadAverageSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_load_average(raw: &str) -> Result<f64, SamplerError> {
    raw.split_whitespace()
        .next()
        .and_then(|first| first.parse::<f64>().ok())
        .ok_or_else(|| SamplerError::Malformed(raw.trim().to_string()))
}

impl ResourceSampler for LoadAverageSampler {
    fn sample(&self) -> Result<HashMap<String, f64>, SamplerError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| SamplerError::Read {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        let load = parse_load_average(&raw)?;
        Ok(HashMap::from([(CPU_METRIC.to_string(), load / self.cpus)]))
    }
}

/// Reports the same snapshot every time.
pub struct FixedSampler(pub HashMap<String, f64>);

impl ResourceSampler for FixedSampler {
    fn sample(&self) -> Result<HashMap<String, f64>, SamplerError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_load_average() {
        assert_eq!(
            parse_load_average("0.52 0.58 0.59 2/1024 12345\n").unwrap(),
            0.52
        );
        assert!(parse_load_average("").is_err());
        assert!(parse_load_average("busy 0.1").is_err());
    }

    #[test]
    fn test_missing_source_is_read_error() {
        let sampler = LoadAverageSampler::with_path("/nonexistent/loadavg");
        assert!(matches!(sampler.sample(), Err(SamplerError::Read { .. })));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_sample_has_cpu_metric() {
        let usage = LoadAverageSampler::new().sample().unwrap();
        assert!(usage[CPU_METRIC] >= 0.0);
    }
}
