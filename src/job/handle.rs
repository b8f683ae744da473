//! # JobHandle: one reservation, disposed at most once.
//!
//! A [`JobHandle`] owns a reservation granted by the queue. The three disposition
//! methods take `self` by value, so after the first delete/release/bury the handle is
//! gone and a second disposition cannot be expressed. Whether the call succeeded or
//! failed, ownership of the reservation ends when it returns.
//!
//! Stat queries go to the server every time; nothing is cached on the handle.

use std::{fmt, time::Duration};

use super::{Disposition, JobStats};
use crate::{error::QueueError, queue::QueueRef};

/// A reserved job plus the connection it was reserved on.
pub struct JobHandle {
    id: u64,
    body: Vec<u8>,
    queue: QueueRef,
}

impl JobHandle {
    /// Wraps a reservation.
    pub fn new(id: u64, body: Vec<u8>, queue: QueueRef) -> Self {
        Self { id, body, queue }
    }

    /// Server-assigned job id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Job payload, exactly as reserved.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Fetches fresh statistics (one round trip).
    pub async fn stats(&self) -> Result<JobStats, QueueError> {
        let raw = self.queue.stats_job(self.id).await?;
        JobStats::from_map(&raw)
    }

    /// Current priority.
    pub async fn priority(&self) -> Result<u32, QueueError> {
        Ok(self.stats().await?.priority)
    }

    /// Remaining time-to-run (whole seconds, rounded down by the server).
    pub async fn time_left(&self) -> Result<Duration, QueueError> {
        Ok(self.stats().await?.time_left)
    }

    /// Number of reservations of this job that reached their TTR.
    pub async fn timeouts(&self) -> Result<u64, QueueError> {
        Ok(self.stats().await?.timeouts)
    }

    /// Number of times this job was released.
    pub async fn releases(&self) -> Result<u64, QueueError> {
        Ok(self.stats().await?.releases)
    }

    /// Deletes the job.
    pub async fn delete(self) -> Result<(), QueueError> {
        self.stats().await?;
        self.queue.delete(self.id).await
    }

    /// Releases the job at its current priority, ready again after `delay`.
    pub async fn release(self, delay: Duration) -> Result<(), QueueError> {
        let pri = self.priority().await?;
        self.queue.release(self.id, pri, delay).await
    }

    /// Buries the job at its current priority.
    pub async fn bury(self) -> Result<(), QueueError> {
        let pri = self.priority().await?;
        self.queue.bury(self.id, pri).await
    }

    /// Applies `disposition`.
    pub async fn dispose(self, disposition: Disposition) -> Result<(), QueueError> {
        match disposition {
            Disposition::Delete => self.delete().await,
            Disposition::Release { delay } => self.release(delay).await,
            Disposition::Bury => self.bury().await,
        }
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("body_len", &self.body.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobState, MemoryQueue, Queue};
    use std::sync::Arc;

    async fn reserved(q: &MemoryQueue, pri: u32) -> JobHandle {
        q.put("t", pri, Duration::from_secs(60), "payload");
        let (id, body) = q
            .reserve(&["t".to_string()], Duration::ZERO)
            .await
            .unwrap();
        JobHandle::new(id, body, Arc::new(q.clone()))
    }

    #[tokio::test]
    async fn release_preserves_priority() {
        let q = MemoryQueue::new();
        let job = reserved(&q, 777).await;
        let id = job.id();
        assert_eq!(job.body(), b"payload");

        job.release(Duration::ZERO).await.unwrap();
        let stats = q.stats_job(id).await.unwrap();
        assert_eq!(stats["pri"], "777");
        assert_eq!(stats["releases"], "1");
        assert_eq!(q.history(id), vec!["put", "reserve", "release"]);
    }

    #[tokio::test]
    async fn bury_preserves_priority() {
        let q = MemoryQueue::new();
        let job = reserved(&q, 9).await;
        let id = job.id();

        job.dispose(Disposition::Bury).await.unwrap();
        assert_eq!(q.state(id), Some(JobState::Buried));
        assert_eq!(q.stats_job(id).await.unwrap()["pri"], "9");
    }

    #[tokio::test]
    async fn stats_reflect_server_counters() {
        let q = MemoryQueue::new();
        let job = reserved(&q, 0).await;
        q.set_counters(job.id(), 2, 5);

        assert_eq!(job.timeouts().await.unwrap(), 2);
        assert_eq!(job.releases().await.unwrap(), 5);
        assert!(job.time_left().await.unwrap() <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn delete_of_lost_reservation_fails() {
        let q = MemoryQueue::new();
        let job = reserved(&q, 0).await;
        let id = job.id();
        q.delete(id).await.unwrap();

        assert!(matches!(job.delete().await, Err(QueueError::NotFound(n)) if n == id));
    }
}
