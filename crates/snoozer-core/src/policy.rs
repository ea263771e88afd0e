use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::CoreError;

/// Decision returned for an idle report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleAction {
    Stop,
    Continue,
}

impl IdleAction {
    /// The nap time threshold is inclusive.
    pub fn decide(idle_duration: Duration, nap_time: Duration) -> Self {
        if idle_duration >= nap_time {
            IdleAction::Stop
        } else {
            IdleAction::Continue
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IdleAction::Stop => "stop",
            IdleAction::Continue => "continue",
        }
    }
}

impl fmt::Display for IdleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdleAction {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "stop" => Ok(IdleAction::Stop),
            "continue" => Ok(IdleAction::Continue),
            other => Err(CoreError::UnknownAction(other.to_string())),
        }
    }
}

/// An instance is idle when every thresholded metric it reports sits below
/// its threshold. Metrics without a threshold are ignored; with no metric in
/// common there is nothing to judge and the instance counts as busy.
pub fn is_idle(usage: &HashMap<String, f64>, thresholds: &HashMap<String, f64>) -> bool {
    let mut compared = 0;
    for (metric, threshold) in thresholds {
        if let Some(value) = usage.get(metric) {
            if value >= threshold {
                return false;
            }
            compared += 1;
        }
    }
    compared > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decide_boundaries() {
        let nap = Duration::from_secs(1800);
        assert_eq!(IdleAction::decide(Duration::from_secs(1799), nap), IdleAction::Continue);
        assert_eq!(IdleAction::decide(nap, nap), IdleAction::Stop);
        assert_eq!(IdleAction::decide(Duration::from_secs(1801), nap), IdleAction::Stop);
        assert_eq!(IdleAction::decide(Duration::ZERO, nap), IdleAction::Continue);
    }

    #[test]
    fn test_action_strings() {
        assert_eq!(IdleAction::Stop.to_string(), "stop");
        assert_eq!("continue".parse::<IdleAction>().unwrap(), IdleAction::Continue);
        assert!("hibernate".parse::<IdleAction>().is_err());
    }

    #[test]
    fn test_is_idle_requires_all_metrics_below_threshold() {
        let thresholds = HashMap::from([("cpu".to_string(), 0.1), ("net".to_string(), 5.0)]);

        let quiet = HashMap::from([("cpu".to_string(), 0.05), ("net".to_string(), 1.0)]);
        assert!(is_idle(&quiet, &thresholds));

        let busy_network = HashMap::from([("cpu".to_string(), 0.05), ("net".to_string(), 9.0)]);
        assert!(!is_idle(&busy_network, &thresholds));

        let at_threshold = HashMap::from([("cpu".to_string(), 0.1)]);
        assert!(!is_idle(&at_threshold, &thresholds));
    }

    #[test]
    fn test_is_idle_without_common_metrics() {
        let thresholds = HashMap::from([("cpu".to_string(), 0.1)]);
        let usage = HashMap::from([("disk".to_string(), 0.0)]);
        assert!(!is_idle(&usage, &thresholds));
        assert!(!is_idle(&HashMap::new(), &HashMap::new()));
    }

    proptest! {
        #[test]
        fn property_stop_iff_idle_reaches_nap_time(idle in 0u64..100_000, nap in 1u64..100_000) {
            let action = IdleAction::decide(Duration::from_secs(idle), Duration::from_secs(nap));
            prop_assert_eq!(action == IdleAction::Stop, idle >= nap);
        }
    }
}
