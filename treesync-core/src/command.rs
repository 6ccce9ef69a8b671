use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    Interrupt,
    Pause,
    Resume,
}

/// Fan-out channel for run-level commands. Each consumer holds its own
/// receiver; dropping the receiver unsubscribes it.
#[derive(Debug, Clone)]
pub struct CommandBus {
    tx: broadcast::Sender<SyncCommand>,
}

impl CommandBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many subscribers received the command.
    pub fn publish(&self, command: SyncCommand) -> usize {
        self.tx.send(command).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncCommand> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_reaches_nobody() {
        let bus = CommandBus::default();
        assert_eq!(bus.publish(SyncCommand::Interrupt), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_commands_until_dropped() {
        let bus = CommandBus::default();
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.publish(SyncCommand::Pause), 1);
        assert_eq!(rx.recv().await.unwrap(), SyncCommand::Pause);
        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
