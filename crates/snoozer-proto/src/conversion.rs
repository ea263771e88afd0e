// Translation between domain values and their wire scalars.
// Timestamps travel as seconds since the Unix epoch, durations as whole seconds.

use chrono::{DateTime, TimeZone, Utc};
use snoozer_core::{Command, CoreError, InstanceSpec, InstanceState};
use std::convert::TryFrom;
use std::time::Duration;

use crate::v1;

pub fn to_epoch_secs(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

pub fn from_epoch_secs(secs: i64) -> Result<DateTime<Utc>, CoreError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(CoreError::InvalidTimestamp(secs))
}

pub fn duration_to_secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

pub fn secs_to_duration(secs: i64) -> Result<Duration, CoreError> {
    u64::try_from(secs)
        .map(Duration::from_secs)
        .map_err(|_| CoreError::Validation(format!("duration cannot be negative: {secs}")))
}

// InstanceState
impl From<InstanceState> for v1::InstanceState {
    fn from(state: InstanceState) -> Self {
        match state {
            InstanceState::Running => v1::InstanceState::Running,
            InstanceState::Idle => v1::InstanceState::Idle,
            InstanceState::Stopping => v1::InstanceState::Stopping,
            InstanceState::Stopped => v1::InstanceState::Stopped,
            InstanceState::Starting => v1::InstanceState::Starting,
        }
    }
}

impl TryFrom<v1::InstanceState> for InstanceState {
    type Error = CoreError;

    fn try_from(state: v1::InstanceState) -> Result<Self, Self::Error> {
        match state {
            v1::InstanceState::Running => Ok(InstanceState::Running),
            v1::InstanceState::Idle => Ok(InstanceState::Idle),
            v1::InstanceState::Stopping => Ok(InstanceState::Stopping),
            v1::InstanceState::Stopped => Ok(InstanceState::Stopped),
            v1::InstanceState::Starting => Ok(InstanceState::Starting),
            v1::InstanceState::Unspecified => {
                Err(CoreError::UnknownState("unspecified".to_string()))
            }
        }
    }
}

/// Decodes the raw `i32` prost stores for enum fields.
pub fn state_from_wire(raw: i32) -> Result<InstanceState, CoreError> {
    let state = v1::InstanceState::try_from(raw)
        .map_err(|_| CoreError::UnknownState(raw.to_string()))?;
    InstanceState::try_from(state)
}

pub fn state_to_wire(state: InstanceState) -> i32 {
    v1::InstanceState::from(state) as i32
}

// RegisterInstanceRequest
impl From<InstanceSpec> for v1::RegisterInstanceRequest {
    fn from(spec: InstanceSpec) -> Self {
        Self {
            instance_id: spec.instance_id,
            instance_type: spec.instance_type,
            region: spec.region,
            zone: spec.zone,
            provider: spec.provider,
            thresholds: spec.thresholds,
            nap_time: duration_to_secs(spec.nap_time),
        }
    }
}

impl TryFrom<v1::RegisterInstanceRequest> for InstanceSpec {
    type Error = CoreError;

    fn try_from(req: v1::RegisterInstanceRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            instance_id: req.instance_id,
            instance_type: req.instance_type,
            region: req.region,
            zone: req.zone,
            provider: req.provider,
            thresholds: req.thresholds,
            nap_time: secs_to_duration(req.nap_time)?,
        })
    }
}

// Command
impl From<Command> for v1::Command {
    fn from(command: Command) -> Self {
        Self {
            command: command.command,
        }
    }
}

impl From<v1::Command> for Command {
    fn from(command: v1::Command) -> Self {
        Command::new(command.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_epoch_seconds_conversion() {
        let at = from_epoch_secs(1_700_000_000).unwrap();
        assert_eq!(to_epoch_secs(at), 1_700_000_000);
        assert_eq!(from_epoch_secs(0).unwrap().timestamp(), 0);
        assert!(from_epoch_secs(i64::MAX).is_err());
    }

    #[test]
    fn test_duration_conversion_rejects_negative() {
        assert_eq!(secs_to_duration(90).unwrap(), Duration::from_secs(90));
        assert!(secs_to_duration(-1).is_err());
        assert_eq!(duration_to_secs(Duration::from_millis(2_900)), 2);
    }

    #[test]
    fn test_state_wire_values() {
        for state in InstanceState::ALL {
            assert_eq!(state_from_wire(state_to_wire(state)).unwrap(), state);
        }
        assert!(state_from_wire(v1::InstanceState::Unspecified as i32).is_err());
        assert!(state_from_wire(9999).is_err());
    }

    #[test]
    fn test_register_request_carries_nap_time_in_seconds() {
        let spec = InstanceSpec {
            instance_id: "i-1".to_string(),
            instance_type: "e2-small".to_string(),
            region: "europe-west1".to_string(),
            zone: "europe-west1-b".to_string(),
            provider: "gcp".to_string(),
            thresholds: HashMap::from([("cpu".to_string(), 0.2)]),
            nap_time: Duration::from_secs(900),
        };

        let wire: v1::RegisterInstanceRequest = spec.clone().into();
        assert_eq!(wire.nap_time, 900);
        assert_eq!(wire.thresholds.get("cpu"), Some(&0.2));

        let back = InstanceSpec::try_from(wire).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_register_request_with_negative_nap_time_is_rejected() {
        let wire = v1::RegisterInstanceRequest {
            instance_id: "i-1".to_string(),
            nap_time: -5,
            ..Default::default()
        };
        assert!(InstanceSpec::try_from(wire).is_err());
    }
}
