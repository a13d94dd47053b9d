//! Blocks until an asynchronous compute operation completes.
use crate::error::{self, Result};
use models::compute::{locator, ComputeClient, Operation, ResourceLocation};

use snafu::ResultExt;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

#[derive(Debug, Clone, Copy)]
pub struct OperationWaiter {
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl OperationWaiter {
    pub fn new(poll_interval: Duration, timeout: Option<Duration>) -> Self {
        OperationWaiter {
            poll_interval,
            timeout,
        }
    }

    /// Polls `operation` until it is done, it reports an error, the optional timeout elapses, or
    /// `shutdown` is cancelled.
    ///
    /// `target` is the resource the operation acts on; zonal operations are looked up in its project,
    /// and in its zone unless the operation names its own.
    #[instrument(skip(self, client, operation, shutdown), fields(operation = %operation.name), err)]
    pub async fn wait<C: ComputeClient + ?Sized>(
        &self,
        client: &C,
        target: &ResourceLocation,
        operation: Operation,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        check_operation(&operation)?;
        if operation.is_done() {
            return Ok(());
        }

        let zone = operation
            .zone
            .as_deref()
            .map(locator::zone_name)
            .unwrap_or(target.zone.as_str());
        let location = ResourceLocation::new(&target.project, zone, &operation.name);

        let poll = self.poll(client, &location);
        let poll = async {
            match self.timeout {
                Some(max_wait) => timeout(max_wait, poll).await.unwrap_or_else(|_| {
                    error::OperationTimeoutSnafu {
                        operation: &location.name,
                        max_wait,
                    }
                    .fail()
                }),
                None => poll.await,
            }
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => error::CancelledSnafu.fail(),
            result = poll => result,
        }
    }

    async fn poll<C: ComputeClient + ?Sized>(
        &self,
        client: &C,
        location: &ResourceLocation,
    ) -> Result<()> {
        loop {
            sleep(self.poll_interval).await;

            let operation = client
                .get_zone_operation(location)
                .await
                .context(error::FetchOperationSnafu {
                    operation: &location.name,
                })?;
            check_operation(&operation)?;

            if operation.is_done() {
                event!(Level::DEBUG, operation = %location.name, "Operation done.");
                return Ok(());
            }
            event!(
                Level::DEBUG,
                operation = %location.name,
                status = ?operation.status,
                "Operation still in progress."
            );
        }
    }
}

/// Fails if the operation carries an error body, whatever its status.
fn check_operation(operation: &Operation) -> Result<()> {
    match operation.error_body() {
        Some(body) => error::OperationFailedSnafu {
            operation: &operation.name,
            operation_type: &operation.operation_type,
            body,
        }
        .fail(),
        None => Ok(()),
    }
}
