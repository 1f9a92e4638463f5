//! In-flight request tracking with timeout and cancellation

use crate::error::{PipeError, Result};
use crate::transport::{Dispatch, RawResponse, Transport};
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub type RequestId = u64;

/// Lifecycle of a request.
///
/// `Created -> Sent -> {Completed | TimedOut | Cancelled}`, plus
/// `Created -> Cancelled` when cancelled before dispatch. Every transition
/// is a single compare-and-swap, so only one terminal state can ever win.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    Created = 0,
    Sent = 1,
    Completed = 2,
    TimedOut = 3,
    Cancelled = 4,
}

impl RequestState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RequestState::Created,
            1 => RequestState::Sent,
            2 => RequestState::Completed,
            3 => RequestState::TimedOut,
            _ => RequestState::Cancelled,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::TimedOut | RequestState::Cancelled
        )
    }
}

/// One dispatched-but-not-yet-delivered request
pub struct InFlightRequest {
    id: RequestId,
    state: AtomicU8,
    cancelled: CancellationToken,
}

impl InFlightRequest {
    fn new(id: RequestId) -> Self {
        Self {
            id,
            state: AtomicU8::new(RequestState::Created as u8),
            cancelled: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: RequestState, to: RequestState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move a non-terminal request to `Cancelled`. Returns false if it had
    /// already reached a terminal state.
    pub fn cancel(&self) -> bool {
        let won = self.transition(RequestState::Sent, RequestState::Cancelled)
            || self.transition(RequestState::Created, RequestState::Cancelled);
        if won {
            self.cancelled.cancel();
        }
        won
    }
}

/// Executes requests through a transport and owns their in-flight state.
pub struct TransportSession {
    transport: Arc<dyn Transport>,
    in_flight: DashMap<RequestId, Arc<InFlightRequest>>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl TransportSession {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            transport,
            in_flight: DashMap::new(),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of requests not yet delivered
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Run one request to its terminal state.
    ///
    /// `prepare` produces the dispatch (e.g. encodes a multipart body); the
    /// timeout is armed only once it is sent. A late response after timeout
    /// or cancellation is discarded. A timeout too large to be represented as
    /// an instant means the request never times out.
    pub async fn run<F>(&self, prepare: F) -> Result<RawResponse>
    where
        F: Future<Output = Result<Dispatch>> + Send,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Arc::new(InFlightRequest::new(id));
        self.in_flight.insert(id, request.clone());

        let result = self.drive(&request, prepare).await;

        self.in_flight.remove(&id);
        result
    }

    async fn drive<F>(&self, request: &InFlightRequest, prepare: F) -> Result<RawResponse>
    where
        F: Future<Output = Result<Dispatch>> + Send,
    {
        let dispatch = tokio::select! {
            biased;
            _ = request.cancelled.cancelled() => return Err(PipeError::Cancelled),
            prepared = prepare => prepared?,
        };

        let deadline = Instant::now().checked_add(self.timeout);
        if !request.transition(RequestState::Created, RequestState::Sent) {
            return Err(PipeError::Cancelled);
        }
        debug!(request_id = request.id, method = %dispatch.method, url = %dispatch.url, "request sent");

        tokio::select! {
            response = self.transport.execute(dispatch) => {
                if request.transition(RequestState::Sent, RequestState::Completed) {
                    debug!(request_id = request.id, ok = response.is_ok(), "request completed");
                    return response;
                }
                debug!(request_id = request.id, "late response discarded");
            }
            _ = expire(deadline) => {
                if request.transition(RequestState::Sent, RequestState::TimedOut) {
                    warn!(request_id = request.id, timeout = ?self.timeout, "request timed out");
                }
            }
            _ = request.cancelled.cancelled() => {}
        }

        match request.state() {
            RequestState::TimedOut => Err(PipeError::Timeout(self.timeout)),
            _ => {
                debug!(request_id = request.id, "request cancelled");
                Err(PipeError::Cancelled)
            }
        }
    }

    /// Cancel every request that has not reached a terminal state.
    /// Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let pending: Vec<Arc<InFlightRequest>> =
            self.in_flight.iter().map(|entry| entry.value().clone()).collect();
        pending.iter().filter(|request| request.cancel()).count()
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Payload;
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;
    use reqwest::Method;

    /// Responds after `delay`, or never when `delay` is `None`
    struct DelayedTransport {
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Transport for DelayedTransport {
        async fn execute(&self, _dispatch: Dispatch) -> Result<RawResponse> {
            match self.delay {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(RawResponse::new(200, "{}"))
                }
                None => futures::future::pending().await,
            }
        }
    }

    fn session(delay: Option<Duration>, timeout: Duration) -> Arc<TransportSession> {
        Arc::new(TransportSession::new(
            Arc::new(DelayedTransport { delay }),
            timeout,
        ))
    }

    fn dispatch() -> Dispatch {
        Dispatch {
            method: Method::GET,
            url: "http://localhost/items".parse().unwrap(),
            headers: HeaderMap::new(),
            payload: Payload::Empty,
            progress: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_deadline_not_before() {
        let session = session(None, Duration::from_secs(1));
        let start = Instant::now();

        let result = session.run(async { Ok(dispatch()) }).await;

        assert!(matches!(result, Err(PipeError::Timeout(t)) if t == Duration::from_secs(1)));
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn completes_before_deadline() {
        let session = session(Some(Duration::from_millis(200)), Duration::from_secs(1));
        let response = session.run(async { Ok(dispatch()) }).await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_resolves_in_flight_request() {
        let session = session(None, Duration::from_secs(60));
        let runner = session.clone();
        let task = tokio::spawn(async move { runner.run(async { Ok(dispatch()) }).await });

        while session.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.cancel_all(), 1);

        let result = task.await.unwrap();
        assert!(matches!(result, Err(PipeError::Cancelled)));
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancel_before_dispatch_skips_transport() {
        let session = session(Some(Duration::ZERO), Duration::from_secs(5));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let runner = session.clone();
        let task = tokio::spawn(async move {
            runner
                .run(async move {
                    let _ = rx.await;
                    Ok(dispatch())
                })
                .await
        });

        while session.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.cancel_all(), 1);
        let _ = tx.send(());

        assert!(matches!(task.await.unwrap(), Err(PipeError::Cancelled)));
    }

    #[tokio::test]
    async fn cancel_after_completion_is_a_no_op() {
        let session = session(Some(Duration::ZERO), Duration::from_secs(5));
        let response = session.run(async { Ok(dispatch()) }).await;
        assert!(response.is_ok());
        assert_eq!(session.cancel_all(), 0);
    }

    #[tokio::test]
    async fn prepare_errors_are_delivered() {
        let session = session(Some(Duration::ZERO), Duration::from_secs(5));
        let result = session
            .run(async { Err(PipeError::MultipartEncoding("unreadable".into())) })
            .await;
        assert!(matches!(result, Err(PipeError::MultipartEncoding(_))));
        assert_eq!(session.in_flight(), 0);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let request = InFlightRequest::new(1);
        assert!(request.transition(RequestState::Created, RequestState::Sent));
        assert!(request.transition(RequestState::Sent, RequestState::Completed));
        assert!(!request.cancel());
        assert!(!request.transition(RequestState::Sent, RequestState::TimedOut));
        assert_eq!(request.state(), RequestState::Completed);
        assert!(request.state().is_terminal());

        let request = InFlightRequest::new(2);
        assert!(request.cancel());
        assert!(!request.cancel());
        assert!(!request.transition(RequestState::Created, RequestState::Sent));
        assert_eq!(request.state(), RequestState::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn completion_and_cancel_race_resolves_once() {
        for round in 0..50u64 {
            let session = session(Some(Duration::from_micros(round * 37 % 500)), Duration::from_secs(5));
            let mut tasks = Vec::new();
            for _ in 0..8 {
                let runner = session.clone();
                tasks.push(tokio::spawn(async move {
                    runner.run(async { Ok(dispatch()) }).await
                }));
            }
            tokio::time::sleep(Duration::from_micros(round * 11 % 300)).await;
            let cancelled = session.cancel_all();

            let mut ok = 0;
            let mut failed = 0;
            for task in tasks {
                match task.await.unwrap() {
                    Ok(_) => ok += 1,
                    Err(PipeError::Cancelled) => failed += 1,
                    Err(other) => panic!("unexpected error: {}", other),
                }
            }
            assert_eq!(ok + failed, 8);
            assert_eq!(failed, cancelled);
            assert_eq!(session.in_flight(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_timeout_never_fires() {
        let session = session(Some(Duration::from_secs(3600)), Duration::MAX);
        let response = session.run(async { Ok(dispatch()) }).await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_timeout_can_still_be_cancelled() {
        let session = session(None, Duration::MAX);
        let runner = session.clone();
        let task = tokio::spawn(async move { runner.run(async { Ok(dispatch()) }).await });

        while session.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_secs(86_400)).await;
        assert_eq!(session.cancel_all(), 1);
        assert!(matches!(task.await.unwrap(), Err(PipeError::Cancelled)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn completion_timeout_and_cancel_race_resolves_once() {
        let timeout = Duration::from_millis(2);
        for round in 0..60u64 {
            // Responses land just before, at or just after the deadline
            let delay = Duration::from_micros(1_700 + round * 47 % 600);
            let session = session(Some(delay), timeout);
            let mut tasks = Vec::new();
            for _ in 0..8 {
                let runner = session.clone();
                tasks.push(tokio::spawn(async move {
                    runner.run(async { Ok(dispatch()) }).await
                }));
            }
            tokio::time::sleep(Duration::from_micros(1_600 + round * 61 % 800)).await;
            let cancelled = session.cancel_all();

            let (mut ok, mut timed_out, mut failed) = (0, 0, 0);
            for task in tasks {
                match task.await.unwrap() {
                    Ok(_) => ok += 1,
                    Err(PipeError::Timeout(t)) => {
                        assert_eq!(t, timeout);
                        timed_out += 1;
                    }
                    Err(PipeError::Cancelled) => failed += 1,
                    Err(other) => panic!("unexpected error: {}", other),
                }
            }
            assert_eq!(ok + timed_out + failed, 8);
            assert_eq!(failed, cancelled);
            assert_eq!(session.in_flight(), 0);
        }
    }
}
