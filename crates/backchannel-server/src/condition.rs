//! Wait for an agent event after triggering an action.
//!
//! Agent operations usually finish before the state change they cause is
//! observable. [`await_condition`] attaches a listener, runs the trigger, then
//! suspends until an event of the chosen category satisfies the predicate.
//! The timeout applies to that suspension only; the trigger runs to
//! completion and its error always wins.
//!
//! When the matching event can only be told apart using what the trigger
//! returned (a thread id, say), add a correlation with
//! [`ConditionConfig::with_correlation`]. Candidate events are then buffered
//! until the trigger output is known.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use backchannel_server::agent::{Agent, AgentEvent, EventCategory};
//! # use backchannel_server::condition::{ConditionConfig, await_condition};
//! # async fn ping(agent: Arc<dyn Agent>) -> Result<(), Box<dyn std::error::Error>> {
//! let trigger_agent = agent.clone();
//! let observed = await_condition(ConditionConfig::new(
//!     agent.events(),
//!     EventCategory::TrustPingResponseReceived,
//!     |event: &AgentEvent| event.connection_id() == "conn-1",
//!     move || {
//!         let agent = trigger_agent.clone();
//!         async move { agent.send_ping("conn-1").await }
//!     },
//! ))
//! .await?;
//! println!("ping thread {} answered by {:?}", observed.output, observed.event);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::agent::{AgentError, AgentEvent, EventCategory, EventSource, Listener, ListenerId};
use crate::flag::EventFlag;

/// Two minutes
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(120_000);

pub type Predicate = Arc<dyn Fn(&AgentEvent) -> bool + Send + Sync>;

pub type Trigger<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, AgentError>> + Send + Sync>;

/// Second-stage match against the trigger's output
pub type Correlation<T> = Arc<dyn Fn(&T, &AgentEvent) -> bool + Send + Sync>;

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("condition not met within {}ms", .after.as_millis())]
    Timeout { after: Duration },

    #[error("triggering action failed: {0}")]
    Trigger(#[source] AgentError),

    #[error("a wait is already in progress on this instance")]
    AlreadyWaiting,
}

/// Everything a condition wait needs
pub struct ConditionConfig<T> {
    pub source: Arc<dyn EventSource>,
    pub category: EventCategory,
    pub predicate: Predicate,
    pub trigger: Trigger<T>,
    pub correlation: Option<Correlation<T>>,
    /// Bounds the wait for a matching event once the trigger has returned
    pub timeout: Duration,
}

impl<T> ConditionConfig<T> {
    pub fn new<P, F, Fut>(
        source: Arc<dyn EventSource>,
        category: EventCategory,
        predicate: P,
        trigger: F,
    ) -> Self
    where
        P: Fn(&AgentEvent) -> bool + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, AgentError>> + Send + 'static,
    {
        Self {
            source,
            category,
            predicate: Arc::new(predicate),
            trigger: Arc::new(move || trigger().boxed()),
            correlation: None,
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    /// Only accept events that also satisfy `correlate` for the trigger's
    /// output.
    pub fn with_correlation<C>(mut self, correlate: C) -> Self
    where
        C: Fn(&T, &AgentEvent) -> bool + Send + Sync + 'static,
    {
        self.correlation = Some(Arc::new(correlate));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of a satisfied wait
#[derive(Debug, Clone)]
pub struct Observed<T> {
    /// What the trigger returned
    pub output: T,
    /// The first event that satisfied the predicate
    pub event: AgentEvent,
}

/// A reusable condition wait. Only one `wait()` may be outstanding at a time.
pub struct ConditionWait<T> {
    config: ConditionConfig<T>,
    busy: AtomicBool,
}

impl<T: Send + 'static> ConditionWait<T> {
    pub fn new(config: ConditionConfig<T>) -> Self {
        Self {
            config,
            busy: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConditionConfig<T> {
        &self.config
    }

    /// Run the trigger and wait for a matching event.
    ///
    /// Fails with [`WaitError::AlreadyWaiting`] instead of queueing when another
    /// call on this instance has not finished.
    pub async fn wait(&self) -> Result<Observed<T>, WaitError> {
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(WaitError::AlreadyWaiting);
        }
        let _busy = BusyGuard(&self.busy);
        run(&self.config).await
    }
}

/// One-shot form of [`ConditionWait::wait`].
pub async fn await_condition<T: Send + 'static>(
    config: ConditionConfig<T>,
) -> Result<Observed<T>, WaitError> {
    run(&config).await
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Detaches its listener when dropped, including when the wait is cancelled.
struct Subscription {
    source: Arc<dyn EventSource>,
    category: EventCategory,
    id: ListenerId,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.source.off(self.category, self.id);
    }
}

async fn run<T: Send + 'static>(config: &ConditionConfig<T>) -> Result<Observed<T>, WaitError> {
    // Fresh flag and buffer for every call; nothing is shared between waits.
    let flag = EventFlag::new();
    let candidates: Arc<Mutex<Vec<AgentEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let own_id: Arc<OnceLock<ListenerId>> = Arc::new(OnceLock::new());
    // Without a correlation the first predicate match settles the wait.
    let first_match_wins = config.correlation.is_none();

    let listener: Listener = {
        let flag = flag.clone();
        let candidates = candidates.clone();
        let own_id = own_id.clone();
        let predicate = config.predicate.clone();
        let source: Weak<dyn EventSource> = Arc::downgrade(&config.source);
        let category = config.category;
        Arc::new(move |event: &AgentEvent| {
            if !predicate(event) {
                return;
            }
            {
                let mut candidates = candidates.lock();
                if first_match_wins && !candidates.is_empty() {
                    return;
                }
                candidates.push(event.clone());
            }
            flag.set();
            if first_match_wins
                && let (Some(source), Some(id)) = (source.upgrade(), own_id.get())
            {
                source.off(category, *id);
            }
        })
    };

    let subscription = Subscription {
        source: config.source.clone(),
        category: config.category,
        id: config.source.on(config.category, listener),
    };
    let _ = own_id.set(subscription.id);
    debug!(category = %config.category, timeout_ms = config.timeout.as_millis() as u64, "condition wait started");

    let output = match (config.trigger)().await {
        Ok(output) => output,
        Err(error) => {
            debug!(category = %config.category, %error, "condition wait aborted");
            return Err(WaitError::Trigger(error));
        }
    };

    let accepts = |event: &AgentEvent| {
        config
            .correlation
            .as_ref()
            .is_none_or(|correlate| correlate(&output, event))
    };
    let waited = tokio::time::timeout(config.timeout, async {
        loop {
            flag.wait().await;
            if let Some(event) = take_accepted(&candidates, &flag, &accepts) {
                break event;
            }
        }
    })
    .await;
    drop(subscription);

    match waited {
        Ok(event) => {
            debug!(category = %config.category, "condition met");
            Ok(Observed { output, event })
        }
        Err(_) => {
            debug!(category = %config.category, "condition wait timed out");
            Err(WaitError::Timeout {
                after: config.timeout,
            })
        }
    }
}

/// Remove the first buffered event `accepts` allows. Rejected events are
/// dropped and the flag is re-armed while the buffer is still locked, so an
/// event pushed concurrently is never missed.
fn take_accepted(
    candidates: &Mutex<Vec<AgentEvent>>,
    flag: &EventFlag,
    accepts: impl Fn(&AgentEvent) -> bool,
) -> Option<AgentEvent> {
    let mut candidates = candidates.lock();
    if let Some(at) = candidates.iter().position(|event| accepts(event)) {
        return Some(candidates.remove(at));
    }
    candidates.clear();
    flag.clear();
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ConnectionState, EventBus};

    const CATEGORY: EventCategory = EventCategory::TrustPingResponseReceived;

    fn ping_for(connection_id: &'static str) -> impl Fn(&AgentEvent) -> bool + Send + Sync {
        move |event: &AgentEvent| event.connection_id() == connection_id
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_detaches_listener() {
        let bus = Arc::new(EventBus::new());
        let config = ConditionConfig::new(bus.clone(), CATEGORY, |_: &AgentEvent| false, || async {
            Ok::<_, AgentError>(())
        })
        .with_timeout(Duration::from_millis(50));

        let result = await_condition(config).await;
        assert!(matches!(result, Err(WaitError::Timeout { after }) if after == Duration::from_millis(50)));
        assert_eq!(bus.listener_count(CATEGORY), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_with_first_matching_event() {
        let bus = Arc::new(EventBus::new());
        let emitter = bus.clone();
        let config = ConditionConfig::new(bus.clone(), CATEGORY, ping_for("c1"), move || {
            let bus = emitter.clone();
            async move {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    bus.emit(AgentEvent::trust_ping_response_received("other", "t0"));
                    bus.emit(AgentEvent::trust_ping_response_received("c1", "t1"));
                    bus.emit(AgentEvent::trust_ping_response_received("c1", "t2"));
                });
                Ok("sent")
            }
        });

        let observed = await_condition(config).await.unwrap();
        assert_eq!(observed.output, "sent");
        assert!(matches!(
            observed.event,
            AgentEvent::TrustPingResponseReceived { ref thread_id, .. } if thread_id == "t1"
        ));
        assert_eq!(bus.listener_count(CATEGORY), 0);
    }

    #[tokio::test]
    async fn test_listener_is_attached_before_trigger_runs() {
        let bus = Arc::new(EventBus::new());
        let emitter = bus.clone();
        let config = ConditionConfig::new(bus.clone(), CATEGORY, ping_for("c1"), move || {
            emitter.emit(AgentEvent::trust_ping_response_received("c1", "sync"));
            async { Ok(()) }
        });

        let observed = await_condition(config).await.unwrap();
        assert_eq!(observed.event.connection_id(), "c1");
    }

    #[tokio::test]
    async fn test_trigger_failure_propagates_and_detaches() {
        let bus = Arc::new(EventBus::new());
        let config = ConditionConfig::new(bus.clone(), CATEGORY, ping_for("c1"), || async {
            Err::<(), _>(AgentError::Operation("no route".into()))
        });

        let result = await_condition(config).await;
        assert!(matches!(result, Err(WaitError::Trigger(AgentError::Operation(_)))));
        assert_eq!(bus.listener_count(CATEGORY), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_categories_are_ignored() {
        let bus = Arc::new(EventBus::new());
        let emitter = bus.clone();
        let config = ConditionConfig::new(bus.clone(), CATEGORY, |_: &AgentEvent| true, move || {
            emitter.emit(AgentEvent::connection_state_changed("c1", None, ConnectionState::Completed));
            async { Ok(()) }
        })
        .with_timeout(Duration::from_millis(20));

        assert!(matches!(await_condition(config).await, Err(WaitError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_concurrent_wait_fails_fast() {
        let bus = Arc::new(EventBus::new());
        let wait = ConditionWait::new(
            ConditionConfig::new(bus.clone(), CATEGORY, ping_for("c1"), || async { Ok(()) })
                .with_timeout(Duration::from_millis(30)),
        );

        let (first, second) = tokio::join!(wait.wait(), wait.wait());
        assert!(matches!(first, Err(WaitError::Timeout { .. })));
        assert!(matches!(second, Err(WaitError::AlreadyWaiting)));

        // Sequential reuse is fine once the first call has finished.
        assert!(matches!(wait.wait().await, Err(WaitError::Timeout { .. })));
        assert_eq!(bus.listener_count(CATEGORY), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_detaches_listener() {
        let bus = Arc::new(EventBus::new());
        let config = ConditionConfig::new(bus.clone(), CATEGORY, ping_for("c1"), || async { Ok(()) });

        let cancelled = tokio::time::timeout(Duration::from_millis(10), await_condition(config)).await;
        assert!(cancelled.is_err());
        assert_eq!(bus.listener_count(CATEGORY), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_trigger_failure_beats_timeout() {
        let bus = Arc::new(EventBus::new());
        let config = ConditionConfig::new(bus.clone(), CATEGORY, ping_for("c1"), || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err::<(), _>(AgentError::Operation("peer unreachable".into()))
        })
        .with_timeout(Duration::from_millis(50));

        let result = await_condition(config).await;
        assert!(matches!(result, Err(WaitError::Trigger(AgentError::Operation(_)))));
        assert_eq!(bus.listener_count(CATEGORY), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_starts_after_slow_trigger() {
        let bus = Arc::new(EventBus::new());
        let emitter = bus.clone();
        let config = ConditionConfig::new(bus.clone(), CATEGORY, ping_for("c1"), move || {
            let bus = emitter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    bus.emit(AgentEvent::trust_ping_response_received("c1", "late"));
                });
                Ok(())
            }
        })
        .with_timeout(Duration::from_millis(50));

        let observed = await_condition(config).await.unwrap();
        assert_eq!(observed.event.connection_id(), "c1");
    }

    fn same_thread(thread: &String, event: &AgentEvent) -> bool {
        matches!(event, AgentEvent::TrustPingResponseReceived { thread_id, .. } if thread_id == thread)
    }

    #[tokio::test(start_paused = true)]
    async fn test_correlation_skips_events_for_other_output() {
        let bus = Arc::new(EventBus::new());
        let emitter = bus.clone();
        let config = ConditionConfig::new(bus.clone(), CATEGORY, ping_for("c1"), move || {
            let bus = emitter.clone();
            async move {
                // Another caller's response arrives before this trigger returns.
                bus.emit(AgentEvent::trust_ping_response_received("c1", "t-other"));
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    bus.emit(AgentEvent::trust_ping_response_received("c1", "t-other-2"));
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    bus.emit(AgentEvent::trust_ping_response_received("c1", "t-mine"));
                });
                Ok("t-mine".to_string())
            }
        })
        .with_correlation(same_thread)
        .with_timeout(Duration::from_millis(100));

        let observed = await_condition(config).await.unwrap();
        assert!(same_thread(&"t-mine".to_string(), &observed.event));
        assert_eq!(bus.listener_count(CATEGORY), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_correlated_event_buffered_during_trigger() {
        let bus = Arc::new(EventBus::new());
        let emitter = bus.clone();
        let config = ConditionConfig::new(bus.clone(), CATEGORY, ping_for("c1"), move || {
            emitter.emit(AgentEvent::trust_ping_response_received("c1", "t1"));
            async { Ok("t1".to_string()) }
        })
        .with_correlation(same_thread)
        .with_timeout(Duration::from_millis(20));

        let observed = await_condition(config).await.unwrap();
        assert_eq!(observed.output, "t1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_correlation_times_out_without_own_event() {
        let bus = Arc::new(EventBus::new());
        let emitter = bus.clone();
        let config = ConditionConfig::new(bus.clone(), CATEGORY, ping_for("c1"), move || {
            emitter.emit(AgentEvent::trust_ping_response_received("c1", "someone-else"));
            async { Ok("t1".to_string()) }
        })
        .with_correlation(same_thread)
        .with_timeout(Duration::from_millis(20));

        assert!(matches!(await_condition(config).await, Err(WaitError::Timeout { .. })));
        assert_eq!(bus.listener_count(CATEGORY), 0);
    }

    #[test]
    fn test_default_timeout_is_two_minutes() {
        let bus = Arc::new(EventBus::new());
        let config = ConditionConfig::new(bus, CATEGORY, |_: &AgentEvent| true, || async { Ok(()) });
        assert_eq!(config.timeout, Duration::from_secs(120));
    }
}
