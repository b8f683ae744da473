//! # ResultForwarder: the result sink.
//!
//! Forwards the [`JobResult`] of every executed cycle into a caller-owned channel.
//! Delivery is fire-and-forget: a full or closed channel drops the result, and the
//! disposition already committed on the queue is unaffected.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::events::{Event, EventKind};
use crate::job::JobResult;
use crate::subscribers::Subscribe;

/// Subscriber forwarding job results to an mpsc channel.
pub struct ResultForwarder {
    tx: mpsc::Sender<JobResult>,
}

impl ResultForwarder {
    /// Forwards into `tx`.
    pub fn new(tx: mpsc::Sender<JobResult>) -> Self {
        Self { tx }
    }

    /// Creates a forwarder together with the receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<JobResult>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Subscribe for ResultForwarder {
    async fn on_event(&self, ev: &Event) {
        if ev.kind != EventKind::JobCompleted {
            return;
        }
        if let Some(result) = &ev.result {
            if let Err(e) = self.tx.try_send(JobResult::clone(result)) {
                tracing::debug!(job = result.job_id, error = %e, "job result dropped");
            }
        }
    }

    fn name(&self) -> &'static str {
        "result_forwarder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Disposition;

    fn completed(id: u64) -> Event {
        Event::new(EventKind::JobCompleted).with_result(JobResult {
            job_id: id,
            tube: "default".into(),
            exit_status: Some(0),
            timed_out: false,
            stdout: b"ok".to_vec(),
            disposition: Some(Disposition::Delete),
        })
    }

    #[tokio::test]
    async fn forwards_completed_results_only() {
        let (fwd, mut rx) = ResultForwarder::channel(4);
        fwd.on_event(&Event::new(EventKind::JobDeleted).with_job(1)).await;
        fwd.on_event(&completed(1)).await;

        let res = rx.recv().await.unwrap();
        assert_eq!(res.job_id, 1);
        assert!(res.succeeded());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (fwd, mut rx) = ResultForwarder::channel(1);
        fwd.on_event(&completed(1)).await;
        fwd.on_event(&completed(2)).await;

        assert_eq!(rx.recv().await.unwrap().job_id, 1);
        assert!(rx.try_recv().is_err());
    }
}
