use futures::future::join_all;
use std::future::Future;
use std::time::Duration;

use crate::adapters::AdapterError;
use crate::models::Protocol;

/// Per-protocol outcome of a concurrent fan-out
#[derive(Debug)]
pub struct GatherReport<T> {
    pub successes: Vec<(Protocol, T)>,
    pub failures: Vec<(Protocol, AdapterError)>,
}

impl<T> GatherReport<T> {
    /// Emit one warning per failed protocol
    pub fn log_failures(&self, operation: &str) {
        for (protocol, error) in &self.failures {
            tracing::warn!(
                protocol = %protocol,
                operation,
                error = %error,
                "Protocol call failed, continuing with remaining protocols"
            );
        }
    }

    pub fn into_values(self) -> impl Iterator<Item = T> {
        self.successes.into_iter().map(|(_, value)| value)
    }
}

/// Run every future concurrently and keep each outcome, success or failure.
/// With a timeout, a future that does not finish in time counts as failed.
pub async fn gather<T, F>(tasks: Vec<(Protocol, F)>, timeout: Option<Duration>) -> GatherReport<T>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    let (protocols, futures): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();

    let results = join_all(futures.into_iter().map(|fut| async move {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .unwrap_or_else(|_| Err(AdapterError::Timeout(limit.as_millis() as u64))),
            None => fut.await,
        }
    }))
    .await;

    let mut report = GatherReport {
        successes: Vec::new(),
        failures: Vec::new(),
    };
    for (protocol, result) in protocols.into_iter().zip(results) {
        match result {
            Ok(value) => report.successes.push((protocol, value)),
            Err(error) => report.failures.push((protocol, error)),
        }
    }
    report
}
