//! # In-process queue with beanstalkd semantics.
//!
//! [`MemoryQueue`] keeps jobs in a mutex-guarded table and answers the [`Queue`] calls
//! the way beanstalkd would:
//!
//! - reserve picks the most urgent ready job (lowest `pri`, then lowest id) of the
//!   requested tubes, polling until `timeout`;
//! - a reservation that outlives its TTR goes back to ready with `timeouts + 1`;
//! - `time-left` is whole seconds, rounded down;
//! - release with a delay parks the job until the delay elapses.
//!
//! Every command applied to a job is appended to its [`history`](MemoryQueue::history),
//! which makes "exactly one disposition" directly observable in tests.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::{self, Instant};

use super::{Connect, Queue, QueueRef};
use crate::error::QueueError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle state of a job inside a [`MemoryQueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Reservable.
    Ready,
    /// Held by a reserver until the deadline.
    Reserved,
    /// Released with a delay; becomes ready later.
    Delayed,
    /// Needs operator action.
    Buried,
    /// Removed.
    Deleted,
}

#[derive(Debug)]
struct Job {
    tube: String,
    pri: u32,
    ttr: Duration,
    body: Vec<u8>,
    state: JobState,
    deadline: Option<Instant>,
    ready_at: Option<Instant>,
    reserves: u64,
    timeouts: u64,
    releases: u64,
    buries: u64,
    kicks: u64,
    history: Vec<&'static str>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    jobs: BTreeMap<u64, Job>,
    tubes: BTreeSet<String>,
}

impl State {
    /// Expires reservations and delays that are due.
    fn tick(&mut self, now: Instant) {
        for job in self.jobs.values_mut() {
            match job.state {
                JobState::Reserved if job.deadline.is_some_and(|d| d <= now) => {
                    job.state = JobState::Ready;
                    job.deadline = None;
                    job.timeouts += 1;
                    job.history.push("timeout");
                }
                JobState::Delayed if job.ready_at.is_some_and(|r| r <= now) => {
                    job.state = JobState::Ready;
                    job.ready_at = None;
                }
                _ => {}
            }
        }
    }

    fn reserved_mut(&mut self, id: u64) -> Result<&mut Job, QueueError> {
        match self.jobs.get_mut(&id) {
            Some(job) if job.state == JobState::Reserved => Ok(job),
            _ => Err(QueueError::NotFound(id)),
        }
    }
}

/// In-process queue; cheap to clone (shared state).
#[derive(Clone, Debug, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<State>>,
}

impl MemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves the table consistent: every mutation
        // is a single assignment.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts a ready job; returns its id.
    pub fn put(&self, tube: &str, priority: u32, ttr: Duration, body: impl Into<Vec<u8>>) -> u64 {
        let mut st = self.lock();
        st.next_id += 1;
        let id = st.next_id;
        st.tubes.insert(tube.to_string());
        st.jobs.insert(
            id,
            Job {
                tube: tube.to_string(),
                pri: priority,
                ttr: ttr.max(Duration::from_secs(1)),
                body: body.into(),
                state: JobState::Ready,
                deadline: None,
                ready_at: None,
                reserves: 0,
                timeouts: 0,
                releases: 0,
                buries: 0,
                kicks: 0,
                history: vec!["put"],
            },
        );
        id
    }

    /// Current state of a job, `None` if it never existed.
    pub fn state(&self, id: u64) -> Option<JobState> {
        let mut st = self.lock();
        st.tick(Instant::now());
        st.jobs.get(&id).map(|j| j.state)
    }

    /// Commands applied to a job, in order (`put`, `reserve`, `delete`, `timeout`, …).
    pub fn history(&self, id: u64) -> Vec<&'static str> {
        self.lock()
            .jobs
            .get(&id)
            .map(|j| j.history.clone())
            .unwrap_or_default()
    }

    /// Moves a buried job back to ready.
    pub fn kick(&self, id: u64) -> Result<(), QueueError> {
        let mut st = self.lock();
        match st.jobs.get_mut(&id) {
            Some(job) if job.state == JobState::Buried => {
                job.state = JobState::Ready;
                job.kicks += 1;
                job.history.push("kick");
                Ok(())
            }
            _ => Err(QueueError::NotFound(id)),
        }
    }

    /// Overwrites the server-side retry counters of a job (test setup).
    pub fn set_counters(&self, id: u64, timeouts: u64, releases: u64) {
        if let Some(job) = self.lock().jobs.get_mut(&id) {
            job.timeouts = timeouts;
            job.releases = releases;
        }
    }

    /// Makes a delayed job ready now, skipping the rest of its delay.
    pub fn promote(&self, id: u64) {
        if let Some(job) = self.lock().jobs.get_mut(&id) {
            if job.state == JobState::Delayed {
                job.state = JobState::Ready;
                job.ready_at = None;
            }
        }
    }

    fn try_reserve(&self, tubes: &[String]) -> Option<(u64, Vec<u8>)> {
        let now = Instant::now();
        let mut st = self.lock();
        st.tick(now);

        let id = st
            .jobs
            .iter()
            .filter(|(_, j)| j.state == JobState::Ready)
            .filter(|(_, j)| {
                if tubes.is_empty() {
                    j.tube == "default"
                } else {
                    tubes.contains(&j.tube)
                }
            })
            .min_by_key(|(id, j)| (j.pri, **id))
            .map(|(id, _)| *id)?;

        let job = st.jobs.get_mut(&id)?;
        job.state = JobState::Reserved;
        job.deadline = Some(now + job.ttr);
        job.reserves += 1;
        job.history.push("reserve");
        Some((id, job.body.clone()))
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn reserve(
        &self,
        tubes: &[String],
        timeout: Duration,
    ) -> Result<(u64, Vec<u8>), QueueError> {
        let until = Instant::now() + timeout;
        loop {
            if let Some(job) = self.try_reserve(tubes) {
                return Ok(job);
            }
            let now = Instant::now();
            if now >= until {
                return Err(QueueError::TimedOut);
            }
            time::sleep(POLL_INTERVAL.min(until - now)).await;
        }
    }

    async fn delete(&self, id: u64) -> Result<(), QueueError> {
        let mut st = self.lock();
        st.tick(Instant::now());
        let job = st.reserved_mut(id)?;
        job.state = JobState::Deleted;
        job.deadline = None;
        job.history.push("delete");
        Ok(())
    }

    async fn release(&self, id: u64, priority: u32, delay: Duration) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut st = self.lock();
        st.tick(now);
        let job = st.reserved_mut(id)?;
        job.pri = priority;
        job.releases += 1;
        job.deadline = None;
        job.history.push("release");
        if delay.is_zero() {
            job.state = JobState::Ready;
        } else {
            job.state = JobState::Delayed;
            job.ready_at = Some(now + delay);
        }
        Ok(())
    }

    async fn bury(&self, id: u64, priority: u32) -> Result<(), QueueError> {
        let mut st = self.lock();
        st.tick(Instant::now());
        let job = st.reserved_mut(id)?;
        job.pri = priority;
        job.buries += 1;
        job.state = JobState::Buried;
        job.deadline = None;
        job.history.push("bury");
        Ok(())
    }

    async fn stats_job(&self, id: u64) -> Result<HashMap<String, String>, QueueError> {
        let now = Instant::now();
        let mut st = self.lock();
        st.tick(now);
        let job = match st.jobs.get(&id) {
            Some(job) if job.state != JobState::Deleted => job,
            _ => return Err(QueueError::NotFound(id)),
        };

        let left = match job.state {
            JobState::Reserved => job.deadline.map(|d| d.saturating_duration_since(now)),
            JobState::Delayed => job.ready_at.map(|r| r.saturating_duration_since(now)),
            _ => None,
        }
        .unwrap_or_default();
        let state = match job.state {
            JobState::Ready => "ready",
            JobState::Reserved => "reserved",
            JobState::Delayed => "delayed",
            JobState::Buried => "buried",
            JobState::Deleted => "deleted",
        };

        let mut stats = HashMap::new();
        stats.insert("id".to_string(), id.to_string());
        stats.insert("tube".to_string(), job.tube.clone());
        stats.insert("state".to_string(), state.to_string());
        stats.insert("pri".to_string(), job.pri.to_string());
        stats.insert("ttr".to_string(), job.ttr.as_secs().to_string());
        stats.insert("time-left".to_string(), left.as_secs().to_string());
        stats.insert("reserves".to_string(), job.reserves.to_string());
        stats.insert("timeouts".to_string(), job.timeouts.to_string());
        stats.insert("releases".to_string(), job.releases.to_string());
        stats.insert("buries".to_string(), job.buries.to_string());
        stats.insert("kicks".to_string(), job.kicks.to_string());
        Ok(stats)
    }

    async fn list_tubes(&self) -> Result<Vec<String>, QueueError> {
        let st = self.lock();
        let mut tubes: Vec<String> = st.tubes.iter().cloned().collect();
        if !st.tubes.contains("default") {
            tubes.insert(0, "default".to_string());
        }
        Ok(tubes)
    }
}

#[async_trait]
impl Connect for MemoryQueue {
    async fn connect(&self) -> Result<QueueRef, QueueError> {
        Ok(Arc::new(self.clone()))
    }

    fn target(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tubes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn reserve_prefers_urgent_then_oldest() {
        let q = MemoryQueue::new();
        let low = q.put("t", 100, Duration::from_secs(60), "low");
        let urgent = q.put("t", 1, Duration::from_secs(60), "urgent");
        let _other = q.put("elsewhere", 0, Duration::from_secs(60), "x");

        let (id, body) = q.reserve(&tubes(&["t"]), Duration::ZERO).await.unwrap();
        assert_eq!((id, body.as_slice()), (urgent, b"urgent".as_slice()));
        let (id, _) = q.reserve(&tubes(&["t"]), Duration::ZERO).await.unwrap();
        assert_eq!(id, low);
        assert!(matches!(
            q.reserve(&tubes(&["t"]), Duration::from_millis(30)).await,
            Err(QueueError::TimedOut)
        ));
    }

    #[tokio::test]
    async fn expired_reservation_counts_a_timeout() {
        let q = MemoryQueue::new();
        let id = q.put("t", 0, Duration::from_secs(1), "x");
        q.reserve(&tubes(&["t"]), Duration::ZERO).await.unwrap();

        let stats = q.stats_job(id).await.unwrap();
        assert_eq!(stats["state"], "reserved");
        assert_eq!(stats["time-left"], "0");

        time::sleep(Duration::from_millis(1100)).await;
        let (again, _) = q.reserve(&tubes(&["t"]), Duration::ZERO).await.unwrap();
        assert_eq!(again, id);
        assert_eq!(q.stats_job(id).await.unwrap()["timeouts"], "1");
        assert_eq!(q.history(id), vec!["put", "reserve", "timeout", "reserve"]);
    }

    #[tokio::test]
    async fn release_with_delay_parks_the_job() {
        let q = MemoryQueue::new();
        let id = q.put("t", 5, Duration::from_secs(60), "x");
        q.reserve(&tubes(&["t"]), Duration::ZERO).await.unwrap();
        q.release(id, 5, Duration::from_secs(16)).await.unwrap();

        assert_eq!(q.state(id), Some(JobState::Delayed));
        let stats = q.stats_job(id).await.unwrap();
        assert_eq!(stats["releases"], "1");
        assert!(stats["time-left"].parse::<u64>().unwrap() >= 15);

        q.promote(id);
        assert_eq!(q.state(id), Some(JobState::Ready));
    }

    #[tokio::test]
    async fn dispositions_require_a_reservation() {
        let q = MemoryQueue::new();
        let id = q.put("t", 0, Duration::from_secs(60), "x");
        assert!(matches!(q.delete(id).await, Err(QueueError::NotFound(_))));

        q.reserve(&tubes(&["t"]), Duration::ZERO).await.unwrap();
        q.bury(id, 0).await.unwrap();
        assert_eq!(q.state(id), Some(JobState::Buried));
        assert!(matches!(q.bury(id, 0).await, Err(QueueError::NotFound(_))));

        q.kick(id).unwrap();
        q.reserve(&tubes(&["t"]), Duration::ZERO).await.unwrap();
        q.delete(id).await.unwrap();
        assert!(matches!(q.stats_job(id).await, Err(QueueError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_tubes_always_has_default() {
        let q = MemoryQueue::new();
        q.put("emails", 0, Duration::from_secs(1), "x");
        assert_eq!(q.list_tubes().await.unwrap(), vec!["default", "emails"]);
    }
}
