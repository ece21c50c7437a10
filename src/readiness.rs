//! Reachability checks for freshly mapped endpoints.
//!
//! [`retry_until`] is the only retry loop in the crate: it drives an
//! operation at a fixed interval while a classifier says the failure is
//! transient, bounded by a deadline and an external [`CancellationToken`].
//! [`check_available`] builds the TCP probe on top of it.

use crate::domain::{Error, Result};
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const PROBE_INTERVAL: Duration = Duration::from_millis(50);
pub const SLOW_NETWORK_THRESHOLD: Duration = Duration::from_secs(1);

/// Seconds to wait for a mapped endpoint to accept connections. Unset disables the probe.
pub const PROBE_TIMEOUT_ENV: &str = "TC_HOST_AVAILABLE_TIMEOUT_SECOND";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

#[derive(Debug)]
pub enum RetryError<E> {
    DeadlineExceeded { attempts: u32 },
    Cancelled,
    /// The classifier rejected the error; it is returned as-is.
    Fatal(E),
}

/// Runs `op` until it succeeds, fails with an error `is_retryable` rejects,
/// the deadline elapses or `cancel` fires.
///
/// An attempt still in flight when the deadline or cancellation wins is
/// dropped and its outcome discarded.
pub async fn retry_until<T, E, Op, Fut, R>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: Op,
    is_retryable: R,
) -> std::result::Result<T, RetryError<E>>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let attempts = AtomicU32::new(0);

    let worker = async {
        loop {
            attempts.fetch_add(1, Ordering::Relaxed);
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if is_retryable(&err) => sleep(policy.interval).await,
                Err(err) => return Err(RetryError::Fatal(err)),
            }
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RetryError::Cancelled),
        res = worker => res,
        _ = sleep(policy.deadline) => Err(RetryError::DeadlineExceeded {
            attempts: attempts.load(Ordering::Relaxed),
        }),
    }
}

/// Probe configuration taken from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub budget: Duration,
}

impl ProbeSettings {
    pub fn from_env() -> Option<Self> {
        Self::parse(std::env::var(PROBE_TIMEOUT_ENV).ok().as_deref())
    }

    fn parse(raw: Option<&str>) -> Option<Self> {
        let seconds: u64 = raw?.trim().parse().ok()?;
        Some(Self {
            budget: Duration::from_secs(seconds),
        })
    }
}

/// Waits until `address` accepts TCP connections.
///
/// "Connection refused" is retried every [`PROBE_INTERVAL`]; any other dial
/// error is returned immediately. The accepted connection is closed at once.
pub async fn check_available(
    address: &str,
    budget: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let started = Instant::now();

    let token = cancel.child_token();
    let _stop_worker = token.clone().drop_guard();

    let policy = RetryPolicy {
        interval: PROBE_INTERVAL,
        deadline: budget,
    };
    let target = address.to_string();
    let worker = tokio::spawn(async move {
        retry_until(
            policy,
            &token,
            || TcpStream::connect(target.clone()),
            |err: &io::Error| err.kind() == io::ErrorKind::ConnectionRefused,
        )
        .await
    });

    let outcome = match worker.await {
        Ok(outcome) => outcome,
        Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
        Err(_) => Err(RetryError::Cancelled),
    };

    let elapsed = started.elapsed();
    if elapsed > SLOW_NETWORK_THRESHOLD {
        warn!("network connection to {address} is very slow ({elapsed:?})");
    }

    match outcome {
        Ok(stream) => {
            drop(stream);
            debug!("{address} accepts connections after {elapsed:?}");
            Ok(())
        }
        Err(RetryError::DeadlineExceeded { attempts }) => {
            debug!("{address} still refusing after {attempts} attempts");
            Err(Error::ReadinessTimeout {
                target: address.to_string(),
                budget,
            })
        }
        Err(RetryError::Cancelled) => Err(Error::Cancelled),
        Err(RetryError::Fatal(source)) => Err(Error::Unreachable {
            address: address.to_string(),
            source,
        }),
    }
}
