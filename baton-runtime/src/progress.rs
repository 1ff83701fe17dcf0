//! Typed progress stream.
//!
//! Progress reporting is a bounded channel of typed updates rather than a
//! callback. Under back-pressure, low-importance updates are dropped;
//! high-importance ones wait for capacity.

use baton_core::{AgentInstanceId, AgentRoleKind};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Updates at or above this importance are never dropped.
const CRITICAL_IMPORTANCE: u8 = 7;

/// One progress report from a running agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub agent_id: AgentInstanceId,
    pub role: AgentRoleKind,
    pub step: String,
    pub step_index: i32,
    pub percent: f32,
    pub importance: u8,
}

/// Sending half of the progress stream.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressSender {
    /// Create a bounded progress channel.
    pub fn channel(capacity: usize) -> (Self, ReceiverStream<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, ReceiverStream::new(rx))
    }

    /// Deliver an update.
    ///
    /// Low-importance updates are dropped when the channel is full;
    /// critical ones await capacity. A closed receiver drops everything
    /// silently - progress is advisory.
    pub async fn send(&self, update: ProgressUpdate) {
        if update.importance >= CRITICAL_IMPORTANCE {
            let _ = self.tx.send(update).await;
            return;
        }
        if let Err(mpsc::error::TrySendError::Full(update)) = self.tx.try_send(update) {
            debug!(
                step = %update.step,
                percent = update.percent,
                "progress channel full; dropping low-importance update"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::EntityIdType;
    use futures::StreamExt;

    fn update(step: &str, importance: u8) -> ProgressUpdate {
        ProgressUpdate {
            agent_id: AgentInstanceId::now_v7(),
            role: AgentRoleKind::Code,
            step: step.to_string(),
            step_index: 1,
            percent: 50.0,
            importance,
        }
    }

    #[tokio::test]
    async fn test_updates_flow_through() {
        let (tx, mut rx) = ProgressSender::channel(4);
        tx.send(update("plan", 3)).await;
        tx.send(update("generate", 3)).await;
        drop(tx);

        let received: Vec<_> = rx.by_ref().collect().await;
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].step, "plan");
    }

    #[tokio::test]
    async fn test_low_importance_dropped_when_full() {
        let (tx, mut rx) = ProgressSender::channel(1);
        tx.send(update("first", 3)).await;
        // Channel is full; this one is low importance and gets dropped
        tx.send(update("second", 3)).await;
        drop(tx);

        let received: Vec<_> = rx.by_ref().collect().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].step, "first");
    }

    #[tokio::test]
    async fn test_critical_updates_wait_for_capacity() {
        let (tx, mut rx) = ProgressSender::channel(1);
        tx.send(update("first", 3)).await;

        let sender = tx.clone();
        let producer = tokio::spawn(async move {
            sender.send(update("terminal", 9)).await;
        });

        // Draining the channel lets the critical update through
        let first = rx.next().await.unwrap();
        assert_eq!(first.step, "first");
        producer.await.unwrap();
        let second = rx.next().await.unwrap();
        assert_eq!(second.step, "terminal");
    }
}
