use std::time::Duration;

use grid_client::domain::Reading;
use time::{Date, OffsetDateTime, UtcOffset};
use tokio_util::sync::CancellationToken;

use super::consumption::ConsumptionGenerator;
use crate::broker::{self, Broker, BrokerError, Channel, Message, RetryPolicy};

/// Slots in one synthetic timelapse day.
pub const TIMELAPSE_SLOTS: i64 = 288;
pub const TIMELAPSE_STEP_MINUTES: i64 = 5;

/// Every five minutes from local midnight of `date`: 00:00, 00:05, … 23:55.
pub fn timelapse_slots(date: Date, offset: UtcOffset) -> impl Iterator<Item = OffsetDateTime> {
    let midnight = date.midnight().assume_offset(offset);
    (0..TIMELAPSE_SLOTS).map(move |i| midnight + time::Duration::minutes(i * TIMELAPSE_STEP_MINUTES))
}

/// Publishes consumption readings onto the queue.
pub struct MeterProducer<B: Broker> {
    broker: B,
    retry: RetryPolicy,
    generator: ConsumptionGenerator,
    site_offset: UtcOffset,
    interval: Duration,
    channel: Option<B::Channel>,
}

impl<B: Broker> MeterProducer<B> {
    pub fn new(
        broker: B,
        retry: RetryPolicy,
        generator: ConsumptionGenerator,
        site_offset: UtcOffset,
        interval: Duration,
    ) -> Self {
        Self {
            broker,
            retry,
            generator,
            site_offset,
            interval,
            channel: None,
        }
    }

    /// Publish one reading, reconnecting on transient failures. A reading whose
    /// publish failed mid-way is sent again, so the queue may see it twice.
    pub async fn publish(
        &mut self,
        reading: &Reading,
        shutdown: &CancellationToken,
    ) -> Result<(), BrokerError> {
        let message = Message::from(reading);
        loop {
            if self.channel.is_none() {
                self.channel = Some(broker::connect(&self.broker, &self.retry, shutdown).await?);
            }
            let Some(channel) = self.channel.as_mut() else {
                continue;
            };

            match channel.publish(&message).await {
                Ok(()) => {
                    metrics::counter!("meter_readings_published_total").increment(1);
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, value_kw = reading.value_kw, "publish failed, reconnecting");
                    self.channel = None;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Publish a reading every interval until `shutdown` fires. A publish in
    /// progress is finished before returning.
    pub async fn run_live(&mut self, shutdown: &CancellationToken) -> Result<u64, BrokerError> {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "meter running live");

        let mut published = 0;
        while !shutdown.is_cancelled() {
            let reading = Reading::new(
                self.generator.next_kw(),
                OffsetDateTime::now_utc().to_offset(self.site_offset),
            );
            match self.publish(&reading, shutdown).await {
                Ok(()) => {
                    published += 1;
                    tracing::info!(value_kw = reading.value_kw, "meter reading sent");
                }
                Err(BrokerError::Cancelled) => break,
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!(published, "meter stopped");
        Ok(published)
    }

    /// Backfill one day: a reading for each five-minute slot, no waiting.
    pub async fn run_timelapse(
        &mut self,
        date: Date,
        shutdown: &CancellationToken,
    ) -> Result<u64, BrokerError> {
        tracing::info!(%date, slots = TIMELAPSE_SLOTS, "meter running timelapse");

        let mut published = 0;
        for ts in timelapse_slots(date, self.site_offset) {
            if shutdown.is_cancelled() {
                break;
            }
            let reading = Reading::new(self.generator.next_kw(), ts);
            match self.publish(&reading, shutdown).await {
                Ok(()) => published += 1,
                Err(BrokerError::Cancelled) => break,
                Err(e) => return Err(e),
            }
            tracing::debug!(value_kw = reading.value_kw, %ts, "timelapse reading sent");
        }

        tracing::info!(published, "timelapse finished");
        Ok(published)
    }
}
