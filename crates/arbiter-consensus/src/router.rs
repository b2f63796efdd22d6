//! Peer message router - command to listener fan-out

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ConsensusError, RouterError};
use crate::types::{Command, PeerId, PeerMessage, VersionMessage};

/// Receiver of routed messages.
///
/// Called on the connection task, so implementations decode and hand work
/// off instead of blocking.
pub trait PeerMessageListener: Send + Sync {
    fn on_message(&self, peer: &PeerId, message: &PeerMessage) -> Result<(), ConsensusError>;
}

pub struct MessageRouter {
    listeners: RwLock<HashMap<Command, Vec<Arc<dyn PeerMessageListener>>>>,
    magic: u32,
    min_version: u32,
}

impl MessageRouter {
    pub fn new(magic: u32, min_version: u32) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            magic,
            min_version,
        }
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    pub fn register(&self, command: Command, listener: Arc<dyn PeerMessageListener>) {
        self.listeners.write().entry(command).or_default().push(listener);
    }

    /// Drop every listener; later messages are dispatched to nobody
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Invoke every listener of the message's command in registration order.
    ///
    /// Returns how many listeners accepted the message.
    pub fn dispatch(&self, peer: &PeerId, message: &PeerMessage) -> usize {
        let listeners = match self.listeners.read().get(&message.command) {
            Some(listeners) => listeners.clone(),
            None => {
                tracing::trace!("No listener for {} from {}", message.command, peer.short());
                return 0;
            }
        };

        let mut accepted = 0;
        for listener in listeners {
            match listener.on_message(peer, message) {
                Ok(()) => accepted += 1,
                Err(e) => tracing::warn!(
                    "Listener failed on {} from {}: {}",
                    message.command,
                    peer.short(),
                    e
                ),
            }
        }
        accepted
    }

    /// Empty message for a wire command name
    pub fn make_message(&self, command: &str) -> Result<PeerMessage, RouterError> {
        let command: Command = command.parse()?;
        Ok(PeerMessage::new(command, Vec::new()))
    }

    /// Check a peer's handshake
    pub fn validate_version(&self, version: &VersionMessage) -> Result<(), RouterError> {
        if version.magic != self.magic {
            return Err(RouterError::MagicMismatch {
                expected: self.magic,
                actual: version.magic,
            });
        }
        if version.version < self.min_version {
            return Err(RouterError::VersionTooLow {
                version: version.version,
                minimum: self.min_version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ComplainListener;
    use cross_chain_types::PublicKey;
    use parking_lot::Mutex;

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl PeerMessageListener for Record {
        fn on_message(&self, _peer: &PeerId, _message: &PeerMessage) -> Result<(), ConsensusError> {
            self.log.lock().push(self.name);
            if self.fail {
                return Err(ConsensusError::Decode("bad payload".to_string()));
            }
            Ok(())
        }
    }

    fn listener(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>, fail: bool) -> Arc<Record> {
        Arc::new(Record {
            name,
            log: log.clone(),
            fail,
        })
    }

    fn version(version: u32, magic: u32) -> VersionMessage {
        VersionMessage {
            version,
            magic,
            public_key: PublicKey::new([1; 32]),
            port: 20338,
        }
    }

    #[test]
    fn test_dispatch_continues_after_listener_error() {
        let router = MessageRouter::new(7, 1);
        let log = Arc::new(Mutex::new(Vec::new()));
        router.register(Command::Withdraw, listener("first", &log, true));
        router.register(Command::Withdraw, listener("second", &log, false));
        router.register(Command::Deposit, listener("other", &log, false));

        let message = PeerMessage::new(Command::Withdraw, vec![]);
        let accepted = router.dispatch(&PublicKey::new([9; 32]), &message);

        assert_eq!(accepted, 1);
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_dispatch_without_listeners() {
        let router = MessageRouter::new(7, 1);
        let message = PeerMessage::new(Command::Complain, vec![]);
        assert_eq!(router.dispatch(&PublicKey::new([9; 32]), &message), 0);

        router.register(Command::Complain, Arc::new(ComplainListener));
        router.clear();
        assert_eq!(router.dispatch(&PublicKey::new([9; 32]), &message), 0);
    }

    #[test]
    fn test_make_message() {
        let router = MessageRouter::new(7, 1);
        assert_eq!(router.make_message("deposit").unwrap().command, Command::Deposit);
        assert_eq!(
            router.make_message("ping"),
            Err(RouterError::UnsupportedCommand("ping".to_string()))
        );
    }

    #[test]
    fn test_validate_version() {
        let router = MessageRouter::new(7, 2);
        assert!(router.validate_version(&version(2, 7)).is_ok());
        assert_eq!(
            router.validate_version(&version(1, 7)),
            Err(RouterError::VersionTooLow { version: 1, minimum: 2 })
        );
        assert_eq!(
            router.validate_version(&version(3, 8)),
            Err(RouterError::MagicMismatch { expected: 7, actual: 8 })
        );
    }
}
