use grid_client::domain::ReportRecord;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use super::{Disposition, PipelineError, Sink};
use crate::broker::{self, Broker, BrokerError, Channel, Delivery, RetryPolicy};
use crate::transform::{parse_reading, PvAggregation};

/// Consumes meter readings, adds simulated PV output and appends the result
/// to the report store. A delivery is acknowledged only after its record has
/// been appended.
pub struct PvSimulator<B: Broker, S> {
    broker: B,
    retry: RetryPolicy,
    sink: S,
    aggregation: PvAggregation,
    max_consecutive_store_failures: u32,
    store_failures: u32,
}

impl<B, S> PvSimulator<B, S>
where
    B: Broker,
    S: Sink<ReportRecord>,
{
    pub fn new(broker: B, retry: RetryPolicy, sink: S, aggregation: PvAggregation) -> Self {
        Self {
            broker,
            retry,
            sink,
            aggregation,
            max_consecutive_store_failures: 10,
            store_failures: 0,
        }
    }

    /// `0` disables the limit.
    pub fn with_max_consecutive_store_failures(mut self, max: u32) -> Self {
        self.max_consecutive_store_failures = max;
        self
    }

    fn store_failures_exhausted(&self) -> bool {
        self.max_consecutive_store_failures > 0
            && self.store_failures >= self.max_consecutive_store_failures
    }

    /// Process one delivery and decide how it is settled.
    pub async fn handle(&mut self, delivery: &Delivery) -> Disposition {
        let received_at = OffsetDateTime::now_utc();
        let env = match parse_reading(delivery, received_at, self.aggregation.offset()) {
            Ok(env) => env,
            Err(e) => {
                metrics::counter!("pv_malformed_messages_total").increment(1);
                tracing::warn!(error = %e, tag = delivery.tag, "dropping malformed meter message");
                return Disposition::Discard;
            }
        };

        let record = self.aggregation.apply(&env);
        match self.sink.append(&record).await {
            Ok(()) => {
                self.store_failures = 0;
                let lag = received_at - env.payload.ts;
                if lag.is_positive() {
                    metrics::histogram!("pv_end_to_end_latency_seconds").record(lag.as_seconds_f64());
                }
                tracing::info!(
                    ts = %record.ts,
                    meter_kw = record.meter_kw,
                    pv_kw = record.pv_kw,
                    total_kw = record.total_kw(),
                    redelivered = env.redelivered,
                    "pv record stored"
                );
                Disposition::Ack
            }
            Err(e) => {
                self.store_failures += 1;
                tracing::error!(
                    error = %e,
                    consecutive = self.store_failures,
                    "report append failed, returning message to queue"
                );
                Disposition::Requeue
            }
        }
    }

    /// Consume until `shutdown` fires. Returns the number of records stored.
    ///
    /// A delivery already taken is processed and settled before the loop
    /// notices cancellation. Lost connections are reopened through the retry
    /// policy.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<u64, PipelineError> {
        tracing::info!(site_offset = %self.aggregation.offset(), "pv simulator consuming");

        let mut stored: u64 = 0;
        let mut channel: Option<B::Channel> = None;

        loop {
            if channel.is_none() {
                match broker::connect(&self.broker, &self.retry, &shutdown).await {
                    Ok(ch) => channel = Some(ch),
                    Err(BrokerError::Cancelled) => break,
                    Err(e) => return Err(e.into()),
                }
            }
            let Some(ch) = channel.as_mut() else {
                continue;
            };

            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = ch.next_delivery() => next,
            };

            let delivery = match next {
                Ok(Some(d)) => d,
                Ok(None) => {
                    tracing::warn!("consumer cancelled by broker, reopening");
                    channel = None;
                    continue;
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, "lost broker channel, reconnecting");
                    channel = None;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let disposition = self.handle(&delivery).await;
            match ch.settle(delivery.tag, disposition).await {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    // The broker hands the unsettled delivery out again.
                    tracing::warn!(error = %e, tag = delivery.tag, "settle failed, reconnecting");
                    channel = None;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            match disposition {
                Disposition::Ack => stored += 1,
                Disposition::Requeue if self.store_failures_exhausted() => {
                    return Err(PipelineError::StoreWrite(format!(
                        "{} consecutive appends failed, giving up",
                        self.store_failures
                    )));
                }
                _ => {}
            }
        }

        tracing::info!(stored, "pv simulator stopped");
        Ok(stored)
    }
}
