//! [`CommandSender`] – the only path from a drive decision to the control
//! upstream.
//!
//! The sender owns the control [`UpstreamConnector`].  Commands are encoded
//! with [`Command::to_json`] and pushed into the connector's outbound slot.
//! With the default blocking outbound policy a push waits until the worker
//! has taken the previous command; the wait is done in short steps so a
//! process shutdown is never held up by a control upstream that is down.

use std::time::Duration;

use roverlink_middleware::{StopSignal, UpstreamConnector, WireMessage};
use roverlink_types::{Command, RelayError};
use tracing::{debug, warn};

/// Length of one bounded wait for room in the outbound slot.
const PUSH_STEP: Duration = Duration::from_millis(50);

/// Outcome of [`CommandSender::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to the control connector.
    Queued,
    /// Identical to the previous command and suppressed.
    Suppressed,
    /// Shutdown was requested before the slot had room.
    Abandoned,
}

/// Pushes commands into the control connector.
#[derive(Debug)]
pub struct CommandSender {
    control: UpstreamConnector,
    only_on_change: bool,
    last_sent: Option<Command>,
}

impl CommandSender {
    /// Wrap `control`.  With `only_on_change` a command equal to the last one
    /// queued is not sent again.
    pub fn new(control: UpstreamConnector, only_on_change: bool) -> Self {
        Self {
            control,
            only_on_change,
            last_sent: None,
        }
    }

    /// Start the control connector's worker.
    ///
    /// # Errors
    ///
    /// See [`UpstreamConnector::start`].
    pub fn start(&mut self) -> Result<(), RelayError> {
        self.control.start()
    }

    /// Stop and join the control connector's worker.
    pub fn stop(&mut self) {
        self.control.stop();
    }

    /// Queue `command` for the control upstream.
    ///
    /// # Errors
    ///
    /// [`RelayError::Serialization`] if the command cannot be encoded, or the
    /// connector's precondition errors when it was not started or is not
    /// writable.
    pub fn send(&mut self, command: Command, shutdown: &StopSignal) -> Result<Dispatch, RelayError> {
        if self.only_on_change && self.last_sent == Some(command) {
            return Ok(Dispatch::Suppressed);
        }

        let mut message = WireMessage::Text(command.to_json()?);
        while let Some(returned) = self.control.send_timeout(message, PUSH_STEP)? {
            if shutdown.is_set() {
                warn!(command = %command.id, "shutdown while control slot was full; command dropped");
                return Ok(Dispatch::Abandoned);
            }
            message = returned;
        }

        debug!(command = %command.id, value = ?command.value, "command queued");
        self.last_sent = Some(command);
        Ok(Dispatch::Queued)
    }

    pub fn last_sent(&self) -> Option<Command> {
        self.last_sent
    }

    pub fn control(&self) -> &UpstreamConnector {
        &self.control
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roverlink_middleware::connector::ConnectorConfig;
    use roverlink_middleware::memory::MemoryTransport;
    use roverlink_middleware::transport::{Connection, Transport};
    use roverlink_types::{CommandId, ConnectionMode, Endpoint};
    use std::sync::Arc;

    const URI: &str = "mem://car/control";

    fn sender(transport: &Arc<MemoryTransport>, only_on_change: bool) -> CommandSender {
        let control = UpstreamConnector::new(
            "control",
            Endpoint::new(URI, ConnectionMode::Write),
            Arc::clone(transport) as Arc<dyn Transport>,
            ConnectorConfig {
                reconnect_backoff: Duration::from_millis(20),
                ..ConnectorConfig::default()
            },
        );
        CommandSender::new(control, only_on_change)
    }

    #[test]
    fn queued_command_reaches_control_upstream() {
        let transport = Arc::new(MemoryTransport::new());
        let listener = transport.bind(URI);
        let mut commands = sender(&transport, false);
        commands.start().unwrap();
        let mut peer = listener.accept_timeout(Duration::from_secs(2)).unwrap();

        let outcome = commands.send(Command::brake(), &StopSignal::new()).unwrap();

        assert_eq!(outcome, Dispatch::Queued);
        assert_eq!(
            peer.recv(Duration::from_secs(1)).unwrap(),
            WireMessage::Text(r#"{"command":3,"value":null}"#.into())
        );
        assert_eq!(commands.last_sent(), Some(Command::brake()));
        commands.stop();
    }

    #[test]
    fn repeated_command_is_suppressed_when_only_on_change() {
        let transport = Arc::new(MemoryTransport::new());
        let listener = transport.bind(URI);
        let mut commands = sender(&transport, true);
        commands.start().unwrap();
        let mut peer = listener.accept_timeout(Duration::from_secs(2)).unwrap();
        let shutdown = StopSignal::new();

        assert_eq!(commands.send(Command::brake(), &shutdown).unwrap(), Dispatch::Queued);
        assert_eq!(commands.send(Command::brake(), &shutdown).unwrap(), Dispatch::Suppressed);
        let turn = Command::new(CommandId::TurnLeft, Some(40));
        assert_eq!(commands.send(turn, &shutdown).unwrap(), Dispatch::Queued);

        let first = peer.recv(Duration::from_secs(1)).unwrap();
        let second = peer.recv(Duration::from_secs(1)).unwrap();
        assert_eq!(first, WireMessage::Text(r#"{"command":3,"value":null}"#.into()));
        assert_eq!(second, WireMessage::Text(r#"{"command":4,"value":40}"#.into()));
        commands.stop();
    }

    #[test]
    fn shutdown_abandons_push_while_upstream_is_down() {
        let transport = Arc::new(MemoryTransport::new());
        let mut commands = sender(&transport, false);
        commands.start().unwrap();
        let shutdown = StopSignal::new();

        // Nothing is bound: the first command fills the slot and stays there.
        assert_eq!(commands.send(Command::brake(), &shutdown).unwrap(), Dispatch::Queued);

        shutdown.set();
        let outcome = commands
            .send(Command::new(CommandId::Advance, Some(50)), &shutdown)
            .unwrap();
        assert_eq!(outcome, Dispatch::Abandoned);
        assert_eq!(commands.last_sent(), Some(Command::brake()));
        commands.stop();
    }

    #[test]
    fn send_before_start_is_rejected() {
        let transport = Arc::new(MemoryTransport::new());
        let mut commands = sender(&transport, false);
        let err = commands.send(Command::brake(), &StopSignal::new()).unwrap_err();
        assert!(matches!(err, RelayError::NotStarted(_)));
    }
}
