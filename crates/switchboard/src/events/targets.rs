//! Stock event targets.

use meshward_common::Event;
use tokio::sync::mpsc;

use super::bus::EventTarget;

/// Writes every delivered event to the log
#[derive(Debug, Default)]
pub struct LogSink;

impl EventTarget for LogSink {
    fn receive(&self, source: &str, event: &Event) {
        match &event.node {
            Some(node) => tracing::debug!(
                source = source,
                action = %event.action,
                node = %node.node_id,
                conn = node.mask.bits(),
                pwr = node.power.value(),
                "Event"
            ),
            None => tracing::debug!(
                source = source,
                etype = %event.etype,
                action = %event.action,
                msg = ?event.msg,
                "Event"
            ),
        }
    }
}

/// Forwards events into a channel, e.g. towards a client session task
pub struct ChannelTarget {
    tx: mpsc::UnboundedSender<(String, Event)>,
}

impl ChannelTarget {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, Event)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventTarget for ChannelTarget {
    fn receive(&self, source: &str, event: &Event) {
        if self.tx.send((source.to_string(), event.clone())).is_err() {
            tracing::trace!(action = %event.action, "Channel target closed, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_target_forwards() {
        let (target, mut rx) = ChannelTarget::new();
        target.receive("server-1", &Event::server_stopped());

        let (source, event) = rx.recv().await.unwrap();
        assert_eq!(source, "server-1");
        assert_eq!(event.action, "stopped");
    }

    #[test]
    fn test_try_recv_after_receive() {
        let (target, mut rx) = ChannelTarget::new();
        target.receive("server-1", &Event::new("user", "login"));

        let (_, event) = tokio_test::assert_ok!(rx.try_recv());
        assert_eq!(event.etype, "user");
        tokio_test::assert_err!(rx.try_recv());
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (target, rx) = ChannelTarget::new();
        drop(rx);
        target.receive("server-1", &Event::server_stopped());
        LogSink.receive("server-1", &Event::server_stopped());
    }
}
