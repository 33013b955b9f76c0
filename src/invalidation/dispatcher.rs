//! Invalidation dispatcher.
//!
//! Fans a change event out to every configured backend, one task per
//! (target, backend) pair, retries transient failures with bounded backoff,
//! and joins everything into a single [`InvalidationResult`]. Nothing escapes
//! `dispatch` as an error; failures are data on the returned outcomes.

use std::any::Any;
use std::collections::HashMap;
use std::future::{self, Future};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, instrument, warn};

use crate::domain::{
    AbandonedPair, ChangeEvent, InvalidationOutcome, InvalidationResult, InvalidationTarget,
};

use super::backend::{CancelPolicy, Concurrency, SharedBackend};
use super::config::DispatchConfig;
use super::retry::RetryPolicy;

#[derive(Clone)]
struct RegisteredBackend {
    name: Arc<str>,
    adapter: SharedBackend,
    gate: Option<Arc<Mutex<()>>>,
}

impl RegisteredBackend {
    fn new(adapter: SharedBackend) -> Self {
        let gate = match adapter.concurrency() {
            Concurrency::Shared => None,
            Concurrency::Serialized => Some(Arc::new(Mutex::new(()))),
        };
        Self {
            name: Arc::from(adapter.name()),
            adapter,
            gate,
        }
    }
}

/// Fans change events out to a fixed set of backend adapters.
///
/// Adapters and policy are fixed at construction; the dispatcher holds no
/// other state and can be shared freely across events.
pub struct InvalidationDispatcher {
    backends: Vec<RegisteredBackend>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl InvalidationDispatcher {
    pub fn new(config: &DispatchConfig, backends: Vec<SharedBackend>) -> Self {
        Self::with_policy(config.retry_policy(), config.call_timeout(), backends)
    }

    pub fn with_policy(
        retry: RetryPolicy,
        call_timeout: Duration,
        backends: Vec<SharedBackend>,
    ) -> Self {
        Self {
            backends: backends.into_iter().map(RegisteredBackend::new).collect(),
            retry,
            call_timeout,
        }
    }

    /// Backend names in dispatch order.
    pub fn backend_names(&self) -> Vec<&str> {
        self.backends
            .iter()
            .map(|backend| &*backend.name)
            .collect()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Invalidate every affected URL on every backend.
    pub async fn dispatch(&self, event: &ChangeEvent) -> InvalidationResult {
        self.dispatch_until(event, future::pending::<()>()).await
    }

    /// Like [`dispatch`](Self::dispatch), but stops waiting once `cancel`
    /// completes.
    ///
    /// Pairs owned by [`CancelPolicy::Abandon`] adapters are aborted and listed
    /// in `abandoned`; [`CancelPolicy::Finish`] adapters run to completion.
    /// Outcomes collected before cancellation are always returned.
    #[instrument(
        skip_all,
        fields(event_id = %event.id(), content_id = event.content_id(), kind = %event.kind())
    )]
    pub async fn dispatch_until<C>(&self, event: &ChangeEvent, cancel: C) -> InvalidationResult
    where
        C: Future<Output = ()> + Send,
    {
        let started_at = Instant::now();

        let pairs: Vec<(InvalidationTarget, RegisteredBackend)> = event
            .targets()
            .iter()
            .flat_map(|target| {
                self.backends
                    .iter()
                    .map(move |backend| (target.clone(), backend.clone()))
            })
            .collect();

        debug!(
            targets = event.targets().len(),
            backends = self.backends.len(),
            pairs = pairs.len(),
            "Dispatch starting"
        );

        let mut slots: Vec<Option<InvalidationOutcome>> = vec![None; pairs.len()];
        let mut tasks = JoinSet::new();
        let mut handles: Vec<(AbortHandle, CancelPolicy)> = Vec::with_capacity(pairs.len());
        let mut task_index = HashMap::with_capacity(pairs.len());

        for (index, (target, backend)) in pairs.iter().cloned().enumerate() {
            let policy = backend.adapter.cancel_policy();
            let retry = self.retry.clone();
            let call_timeout = self.call_timeout;
            let handle = tasks.spawn(async move {
                let outcome = run_pair(&backend, &target, &retry, call_timeout).await;
                (index, outcome)
            });
            task_index.insert(handle.id(), index);
            handles.push((handle, policy));
        }

        let mut cancel = std::pin::pin!(cancel);
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, outcome))) => slots[index] = Some(outcome),
                    Some(Err(err)) if err.is_cancelled() => {}
                    Some(Err(err)) => {
                        error!(error = %err, "Invalidation task failed to join");
                        if let Some(&index) = task_index.get(&err.id()) {
                            let (target, backend) = &pairs[index];
                            slots[index] = Some(InvalidationOutcome::permanent(
                                target,
                                &*backend.name,
                                format!("invalidation task failed: {err}"),
                            ));
                        }
                    }
                    None => break,
                },
                () = &mut cancel, if !cancelled => {
                    cancelled = true;
                    let mut aborted = 0usize;
                    for (handle, policy) in &handles {
                        if *policy == CancelPolicy::Abandon && !handle.is_finished() {
                            handle.abort();
                            aborted += 1;
                        }
                    }
                    warn!(aborted, "Dispatch cancelled; collecting partial result");
                }
            }
        }

        let mut outcomes = Vec::with_capacity(pairs.len());
        let mut abandoned = Vec::new();
        for ((target, backend), slot) in pairs.into_iter().zip(slots) {
            match slot {
                Some(outcome) => outcomes.push(outcome),
                None => abandoned.push(AbandonedPair {
                    url: target.url().clone(),
                    backend_name: backend.name.to_string(),
                }),
            }
        }

        InvalidationResult {
            event_id: event.id(),
            content_id: event.content_id().to_string(),
            outcomes,
            abandoned,
            cancelled,
            elapsed: started_at.elapsed(),
        }
    }
}

async fn run_pair(
    backend: &RegisteredBackend,
    target: &InvalidationTarget,
    retry: &RetryPolicy,
    call_timeout: Duration,
) -> InvalidationOutcome {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let outcome = call_once(backend, target, call_timeout).await;
        if !outcome.status.is_retryable() || !retry.allows_another(attempts) {
            return outcome.with_attempts(attempts);
        }

        let delay = retry.next_delay(attempts);
        debug!(
            backend = &*backend.name,
            url = %target.url(),
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = outcome.last_error.as_deref().unwrap_or(""),
            "Transient invalidation failure; retrying"
        );
        sleep(delay).await;
    }
}

async fn call_once(
    backend: &RegisteredBackend,
    target: &InvalidationTarget,
    call_timeout: Duration,
) -> InvalidationOutcome {
    let _serialized = match &backend.gate {
        Some(gate) => Some(gate.lock().await),
        None => None,
    };

    let name = &*backend.name;
    let call = async { timeout(call_timeout, backend.adapter.invalidate(target)).await };

    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(mut outcome)) => {
            // Outcomes are keyed by (url, backend); never trust the adapter to echo them.
            outcome.target = target.clone();
            outcome.backend_name = name.to_string();
            outcome
        }
        Ok(Err(_elapsed)) => InvalidationOutcome::transient(
            target,
            name,
            format!("call timed out after {}ms", call_timeout.as_millis()),
        ),
        Err(panic) => InvalidationOutcome::permanent(
            target,
            name,
            format!("backend panicked: {}", panic_message(panic.as_ref())),
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
