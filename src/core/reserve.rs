//! # ReservationLoop: "give me the next job", absorbing the transient answers.
//!
//! - `TIMED_OUT` (empty queue): retry at once; this is the idle state.
//! - `DEADLINE_SOON` (an earlier reservation on this connection is about to expire):
//!   sleep `deadline_soon_delay`, then retry.
//! - Anything else is fatal to the broker.
//!
//! The reserve timeout is long but finite, so server-side conditions surface
//! periodically instead of hanging forever. Cancellation is observed while blocked in
//! reserve and during the DEADLINE_SOON pause; a reservation granted while the request
//! was being abandoned is returned by the server when the connection closes.

use std::time::Duration;

use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::{error::BrokerError, error::QueueError, job::JobHandle, queue::QueueRef};

/// Reserve loop over one connection and a fixed tube list.
pub struct ReservationLoop {
    queue: QueueRef,
    tubes: Vec<String>,
    timeout: Duration,
    deadline_soon_delay: Duration,
}

impl ReservationLoop {
    /// Creates a loop reserving from `tubes`.
    pub fn new(
        queue: QueueRef,
        tubes: Vec<String>,
        timeout: Duration,
        deadline_soon_delay: Duration,
    ) -> Self {
        Self {
            queue,
            tubes,
            timeout,
            deadline_soon_delay,
        }
    }

    /// Waits for the next job. Returns `Ok(None)` once `cancel` fires.
    pub async fn reserve(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<JobHandle>, BrokerError> {
        loop {
            let answer = select! {
                _ = cancel.cancelled() => return Ok(None),
                answer = self.queue.reserve(&self.tubes, self.timeout) => answer,
            };
            match answer {
                Ok((id, body)) => {
                    return Ok(Some(JobHandle::new(id, body, self.queue.clone())));
                }
                Err(QueueError::TimedOut) => {
                    tracing::trace!(tubes = ?self.tubes, "reserve timed out, retrying");
                }
                Err(QueueError::DeadlineSoon) => {
                    tracing::debug!(tubes = ?self.tubes, "deadline soon, pausing reserve");
                    select! {
                        _ = cancel.cancelled() => return Ok(None),
                        _ = time::sleep(self.deadline_soon_delay) => {}
                    }
                }
                Err(e) => return Err(BrokerError::Reserve(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::{
        collections::{HashMap, VecDeque},
        sync::{Arc, Mutex},
    };

    /// Queue answering reserve from a script; the other calls are unused.
    struct Scripted(Mutex<VecDeque<Result<(u64, Vec<u8>), QueueError>>>);

    impl Scripted {
        fn new(answers: Vec<Result<(u64, Vec<u8>), QueueError>>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(answers.into())))
        }

        fn remaining(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl crate::queue::Queue for Scripted {
        async fn reserve(
            &self,
            _tubes: &[String],
            _timeout: Duration,
        ) -> Result<(u64, Vec<u8>), QueueError> {
            let next = self.0.lock().unwrap().pop_front();
            match next {
                Some(answer) => answer,
                None => std::future::pending().await,
            }
        }
        async fn delete(&self, _id: u64) -> Result<(), QueueError> {
            unimplemented!()
        }
        async fn release(&self, _id: u64, _pri: u32, _delay: Duration) -> Result<(), QueueError> {
            unimplemented!()
        }
        async fn bury(&self, _id: u64, _pri: u32) -> Result<(), QueueError> {
            unimplemented!()
        }
        async fn stats_job(&self, _id: u64) -> Result<HashMap<String, String>, QueueError> {
            unimplemented!()
        }
        async fn list_tubes(&self) -> Result<Vec<String>, QueueError> {
            unimplemented!()
        }
    }

    fn looped(q: Arc<Scripted>) -> ReservationLoop {
        ReservationLoop::new(
            q,
            vec!["default".into()],
            Duration::from_secs(3600),
            Duration::from_secs(1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn transient_answers_are_absorbed() {
        let q = Scripted::new(vec![
            Err(QueueError::TimedOut),
            Err(QueueError::TimedOut),
            Err(QueueError::DeadlineSoon),
            Ok((5, b"body".to_vec())),
        ]);
        let started = time::Instant::now();

        let job = looped(q.clone())
            .reserve(&CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(job.id(), 5);
        assert_eq!(job.body(), b"body");
        assert_eq!(q.remaining(), 0);
        // Only the DEADLINE_SOON answer waits.
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn other_errors_are_fatal() {
        let q = Scripted::new(vec![Err(QueueError::Protocol("INTERNAL_ERROR".into()))]);
        let err = looped(q).reserve(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Reserve(QueueError::Protocol(_))));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_blocked_reserve() {
        let q = Scripted::new(vec![]);
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        assert!(looped(q).reserve(&token).await.unwrap().is_none());
    }
}
