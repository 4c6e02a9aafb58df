//! [`DrivePolicy`] – decides whether the latest observations call for an
//! actuation command.
//!
//! Policies are stateless: the decision depends only on the telemetry and
//! frame passed in.  The session calls [`DrivePolicy::decide`] once per
//! iteration that produced at least one packet.
//!
//! | Policy | Behaviour |
//! |---|---|
//! | [`ProximityBrake`] | Brake when `distance_ahead` is below a threshold. |
//! | [`NoopPolicy`] | Never commands; the relay only observes. |
//! | any `Fn(&Telemetry, Option<&[u8]>) -> Option<Command>` | Custom rule. |
//!
//! # Example
//!
//! ```rust
//! use roverlink_runtime::drive_policy::{DrivePolicy, ProximityBrake};
//! use roverlink_types::{Command, Telemetry};
//!
//! let policy = ProximityBrake::default();
//! let close = Telemetry::from_json(r#"{"distance_ahead": 3}"#).unwrap();
//! assert_eq!(policy.decide(&close, None), Some(Command::brake()));
//! ```

use roverlink_types::{Command, Telemetry};

/// Distance below which [`ProximityBrake`] stops the vehicle.
pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 5.0;

/// Maps the latest observations to at most one command.
pub trait DrivePolicy: Send {
    fn decide(&self, telemetry: &Telemetry, frame: Option<&[u8]>) -> Option<Command>;
}

impl<F> DrivePolicy for F
where
    F: Fn(&Telemetry, Option<&[u8]>) -> Option<Command> + Send,
{
    fn decide(&self, telemetry: &Telemetry, frame: Option<&[u8]>) -> Option<Command> {
        self(telemetry, frame)
    }
}

/// Brakes while an obstacle is closer than `threshold`.
///
/// Telemetry without a numeric `distance_ahead` never triggers a command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityBrake {
    threshold: f64,
}

impl ProximityBrake {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for ProximityBrake {
    fn default() -> Self {
        Self::new(DEFAULT_DISTANCE_THRESHOLD)
    }
}

impl DrivePolicy for ProximityBrake {
    fn decide(&self, telemetry: &Telemetry, _frame: Option<&[u8]>) -> Option<Command> {
        let distance = telemetry.distance_ahead()?;
        (distance < self.threshold).then(Command::brake)
    }
}

/// Observe-only deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPolicy;

impl DrivePolicy for NoopPolicy {
    fn decide(&self, _telemetry: &Telemetry, _frame: Option<&[u8]>) -> Option<Command> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roverlink_types::CommandId;

    fn telemetry(json: &str) -> Telemetry {
        Telemetry::from_json(json).unwrap()
    }

    #[test]
    fn brakes_when_obstacle_is_close() {
        let policy = ProximityBrake::new(5.0);
        let decision = policy.decide(&telemetry(r#"{"distance_ahead":3}"#), None);
        assert_eq!(decision, Some(Command::new(CommandId::Brake, None)));
        assert_eq!(decision.unwrap().to_json().unwrap(), r#"{"command":3,"value":null}"#);
    }

    #[test]
    fn no_command_when_path_is_clear() {
        let policy = ProximityBrake::new(5.0);
        assert_eq!(policy.decide(&telemetry(r#"{"distance_ahead":10}"#), None), None);
    }

    #[test]
    fn threshold_is_exclusive() {
        let policy = ProximityBrake::new(5.0);
        assert_eq!(policy.decide(&telemetry(r#"{"distance_ahead":5}"#), None), None);
        assert!(policy.decide(&telemetry(r#"{"distance_ahead":4.99}"#), None).is_some());
    }

    #[test]
    fn missing_or_non_numeric_distance_is_ignored() {
        let policy = ProximityBrake::default();
        assert_eq!(policy.decide(&Telemetry::default(), None), None);
        assert_eq!(policy.decide(&telemetry(r#"{"speed":2.0,"rssi":-60}"#), None), None);
        assert_eq!(policy.decide(&telemetry(r#"{"distance_ahead":"near"}"#), None), None);
    }

    #[test]
    fn noop_policy_never_commands() {
        assert_eq!(NoopPolicy.decide(&telemetry(r#"{"distance_ahead":0}"#), None), None);
    }

    #[test]
    fn closures_are_policies() {
        let reverse_when_dark = |_: &Telemetry, frame: Option<&[u8]>| {
            frame
                .filter(|bytes| bytes.iter().all(|b| *b == 0))
                .map(|_| Command::new(CommandId::Retreat, Some(30)))
        };
        let empty = Telemetry::default();
        assert_eq!(reverse_when_dark.decide(&empty, Some(&[1u8, 2][..])), None);
        assert_eq!(
            reverse_when_dark.decide(&empty, Some(&[0u8, 0][..])),
            Some(Command::new(CommandId::Retreat, Some(30)))
        );
    }
}
