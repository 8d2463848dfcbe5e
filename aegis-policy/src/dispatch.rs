//! Background delivery of decisions to the audit sink.

use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::contracts::EvaluationContext;
use crate::decision::EnforcementDecision;
use crate::integrations::AuditSink;

/// Records that may wait for delivery before new ones are refused.
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// Limits applied to background audit delivery.
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    max_concurrency: NonZeroUsize,
    max_attempts: NonZeroU32,
    retry_backoff: Duration,
    max_pending: NonZeroUsize,
}

impl DispatchConfig {
    /// Creates a configuration with the supplied limits and a backlog of
    /// [`DEFAULT_MAX_PENDING`] records, raised to `max_concurrency` if lower.
    #[must_use]
    pub const fn new(
        max_concurrency: NonZeroUsize,
        max_attempts: NonZeroU32,
        retry_backoff: Duration,
    ) -> Self {
        let max_pending = match NonZeroUsize::new(DEFAULT_MAX_PENDING) {
            Some(pending) if pending.get() >= max_concurrency.get() => pending,
            _ => max_concurrency,
        };
        Self {
            max_concurrency,
            max_attempts,
            retry_backoff,
            max_pending,
        }
    }

    /// Caps how many records may be queued or in delivery at once.
    #[must_use]
    pub const fn with_max_pending(mut self, max_pending: NonZeroUsize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Returns the maximum number of concurrent sink calls.
    #[must_use]
    pub const fn max_concurrency(self) -> NonZeroUsize {
        self.max_concurrency
    }

    /// Returns how many times a record is offered to the sink.
    #[must_use]
    pub const fn max_attempts(self) -> NonZeroU32 {
        self.max_attempts
    }

    /// Returns the pause between attempts.
    #[must_use]
    pub const fn retry_backoff(self) -> Duration {
        self.retry_backoff
    }

    /// Returns the backlog limit.
    #[must_use]
    pub const fn max_pending(self) -> NonZeroUsize {
        self.max_pending
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::new(
            NonZeroUsize::new(16).expect("non-zero"),
            NonZeroU32::new(3).expect("non-zero"),
            Duration::from_millis(100),
        )
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn try_enter(&self, limit: usize) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < limit).then_some(count + 1)
            })
            .is_ok()
    }

    fn leave(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Fire-and-forget audit delivery with bounded concurrency and retries.
#[derive(Clone)]
pub struct AuditDispatcher {
    sink: Arc<dyn AuditSink>,
    semaphore: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
    in_flight: Arc<InFlight>,
    config: DispatchConfig,
}

impl std::fmt::Debug for AuditDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditDispatcher")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl AuditDispatcher {
    /// Creates a dispatcher delivering to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>, config: DispatchConfig) -> Self {
        Self {
            sink,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency().get())),
            closed: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(InFlight::default()),
            config,
        }
    }

    /// Returns the associated configuration.
    #[must_use]
    pub const fn config(&self) -> DispatchConfig {
        self.config
    }

    /// Returns `true` once the dispatcher has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the number of records not yet delivered or abandoned.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Stops accepting new records. Records already queued but still waiting
    /// for a delivery slot are dropped with an error log.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.semaphore.close();
    }

    /// Queues a decision for delivery and returns immediately.
    ///
    /// Sink failures are retried up to the configured attempt limit and then
    /// logged; they never reach the caller.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Closed`] when the dispatcher has been closed
    /// and [`DispatchError::Saturated`] when the backlog is full.
    pub fn dispatch(
        &self,
        decision: EnforcementDecision,
        context: EvaluationContext,
    ) -> DispatchResult<JoinHandle<()>> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }

        if !self.in_flight.try_enter(self.config.max_pending().get()) {
            return Err(DispatchError::Saturated);
        }

        let sink = Arc::clone(&self.sink);
        let semaphore = Arc::clone(&self.semaphore);
        let in_flight = Arc::clone(&self.in_flight);
        let config = self.config;

        let handle = tokio::spawn(async move {
            match semaphore.acquire_owned().await {
                Ok(permit) => {
                    deliver(sink.as_ref(), &decision, &context, config).await;
                    drop(permit);
                }
                Err(_) => error!(
                    user_role = decision.user_role(),
                    activity_type = decision.activity_type(),
                    "audit dispatcher closed before record was delivered"
                ),
            }
            in_flight.leave();
        });

        Ok(handle)
    }

    /// Waits until every queued record has been delivered or abandoned.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

async fn deliver(
    sink: &dyn AuditSink,
    decision: &EnforcementDecision,
    context: &EvaluationContext,
    config: DispatchConfig,
) {
    let attempts = config.max_attempts().get();
    for attempt in 1..=attempts {
        match sink.record(decision, context).await {
            Ok(()) => {
                debug!(attempt, "audit record delivered");
                return;
            }
            Err(err) if attempt < attempts => {
                warn!(attempt, error = %err, "audit sink failed, retrying");
                tokio::time::sleep(config.retry_backoff()).await;
            }
            Err(err) => {
                warn!(attempt, error = %err, "audit sink failed, giving up");
            }
        }
    }
}

/// Errors produced by the dispatcher.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Dispatcher is closed and will not accept new records.
    #[error("audit dispatcher closed")]
    Closed,
    /// Too many records are already waiting for delivery.
    #[error("audit backlog full")]
    Saturated,
}

/// Result alias for dispatcher operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::integrations::AuditError;

    #[derive(Default)]
    struct FlakySink {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
        recorded: Mutex<Vec<bool>>,
        in_flight: AtomicUsize,
        max_seen: AtomicUsize,
    }

    #[async_trait]
    impl AuditSink for FlakySink {
        async fn record(
            &self,
            decision: &EnforcementDecision,
            _context: &EvaluationContext,
        ) -> Result<(), AuditError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(AuditError::new("disk full"));
            }
            self.recorded.lock().unwrap().push(decision.allowed());
            Ok(())
        }
    }

    fn decision() -> (EnforcementDecision, EvaluationContext) {
        let ctx = EvaluationContext::new("x", "user", "general");
        (EnforcementDecision::new(&ctx, Vec::new(), Utc::now()), ctx)
    }

    fn config(concurrency: usize, attempts: u32) -> DispatchConfig {
        DispatchConfig::new(
            NonZeroUsize::new(concurrency).unwrap(),
            NonZeroU32::new(attempts).unwrap(),
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn retries_until_sink_accepts() {
        let sink = Arc::new(FlakySink {
            failures_left: AtomicUsize::new(2),
            ..FlakySink::default()
        });
        let dispatcher = AuditDispatcher::new(sink.clone(), config(4, 3));

        let (decision, ctx) = self::decision();
        dispatcher.dispatch(decision, ctx).unwrap();
        dispatcher.wait_idle().await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.recorded.lock().unwrap().as_slice(), [true]);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let sink = Arc::new(FlakySink {
            failures_left: AtomicUsize::new(10),
            ..FlakySink::default()
        });
        let dispatcher = AuditDispatcher::new(sink.clone(), config(4, 2));

        let (decision, ctx) = self::decision();
        dispatcher.dispatch(decision, ctx).unwrap().await.unwrap();

        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
        assert!(sink.recorded.lock().unwrap().is_empty());
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn respects_max_concurrency() {
        let sink = Arc::new(FlakySink::default());
        let dispatcher = AuditDispatcher::new(sink.clone(), config(2, 1));

        for _ in 0..5 {
            let (decision, ctx) = self::decision();
            dispatcher.dispatch(decision, ctx).unwrap();
        }
        dispatcher.wait_idle().await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 5);
        assert!(sink.max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn full_backlog_refuses_records_until_drained() {
        let sink = Arc::new(FlakySink::default());
        let config = config(1, 1).with_max_pending(NonZeroUsize::new(2).unwrap());
        let dispatcher = AuditDispatcher::new(sink.clone(), config);

        for _ in 0..2 {
            let (decision, ctx) = self::decision();
            dispatcher.dispatch(decision, ctx).unwrap();
        }
        let (decision, ctx) = self::decision();
        assert_eq!(
            dispatcher.dispatch(decision, ctx).unwrap_err(),
            DispatchError::Saturated
        );
        assert_eq!(dispatcher.in_flight(), 2);

        dispatcher.wait_idle().await;
        let (decision, ctx) = self::decision();
        dispatcher.dispatch(decision, ctx).unwrap();
        dispatcher.wait_idle().await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backlog_never_undercuts_concurrency() {
        let config = DispatchConfig::new(
            NonZeroUsize::new(DEFAULT_MAX_PENDING + 8).unwrap(),
            NonZeroU32::new(1).unwrap(),
            Duration::ZERO,
        );
        assert_eq!(config.max_pending().get(), DEFAULT_MAX_PENDING + 8);
        assert_eq!(
            DispatchConfig::default().max_pending().get(),
            DEFAULT_MAX_PENDING
        );
    }

    #[tokio::test]
    async fn close_rejects_new_records() {
        let dispatcher =
            AuditDispatcher::new(Arc::new(FlakySink::default()), DispatchConfig::default());
        dispatcher.close();

        let (decision, ctx) = self::decision();
        assert_eq!(dispatcher.dispatch(decision, ctx).unwrap_err(), DispatchError::Closed);
    }
}
