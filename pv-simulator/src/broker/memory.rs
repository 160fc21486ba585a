use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::Notify;

use super::{Broker, BrokerError, Channel, Delivery, Message};
use crate::pipeline::Disposition;

#[derive(Debug, Clone)]
struct Stored {
    message: Message,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    offline: bool,
    fail_opens: u32,
    // Bumped on every outage so channels opened before it stop working.
    generation: u64,
    next_tag: u64,
    ready: VecDeque<Stored>,
    unacked: BTreeMap<u64, Stored>,
}

impl QueueState {
    fn requeue(&mut self, tag: u64) -> bool {
        match self.unacked.remove(&tag) {
            Some(mut s) => {
                s.redelivered = true;
                self.ready.push_front(s);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// In-process queue with the same delivery contract as the AMQP link: FIFO,
/// one unacknowledged delivery per channel, requeue on nack or when a channel
/// is dropped with a delivery outstanding, messages kept across outages.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    queue: String,
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        lock(&self.shared)
    }

    /// Simulate the broker going away or coming back. Going offline breaks
    /// every open channel and returns their unacked deliveries to the queue.
    pub fn set_online(&self, online: bool) {
        let mut state = self.lock();
        if online {
            state.offline = false;
        } else if !state.offline {
            state.offline = true;
            state.generation += 1;
            let tags: Vec<u64> = state.unacked.keys().rev().copied().collect();
            for tag in tags {
                state.requeue(tag);
            }
        }
        drop(state);
        self.shared.notify.notify_waiters();
    }

    /// Make the next `n` connection attempts fail as if the host were down.
    pub fn fail_next_opens(&self, n: u32) {
        self.lock().fail_opens = n;
    }

    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn unacked_len(&self) -> usize {
        self.lock().unacked.len()
    }

    /// Nothing waiting and nothing in flight.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.ready.is_empty() && state.unacked.is_empty()
    }

    /// Messages waiting for a consumer, oldest first.
    pub fn ready_messages(&self) -> Vec<Message> {
        self.lock().ready.iter().map(|s| s.message.clone()).collect()
    }
}

fn lock(shared: &Shared) -> MutexGuard<'_, QueueState> {
    // Critical sections never panic midway, so a poisoned lock still holds
    // consistent state.
    shared.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait::async_trait]
impl Broker for MemoryBroker {
    type Channel = MemoryChannel;

    async fn open(&self) -> Result<MemoryChannel, BrokerError> {
        let mut state = self.lock();
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(BrokerError::Unreachable(format!("{}: connection refused", self.queue)));
        }
        if state.offline {
            return Err(BrokerError::Unreachable(format!("{}: broker offline", self.queue)));
        }
        tracing::debug!(queue = %self.queue, generation = state.generation, "memory channel open");
        Ok(MemoryChannel {
            shared: self.shared.clone(),
            generation: state.generation,
            in_flight: None,
        })
    }
}

pub struct MemoryChannel {
    shared: Arc<Shared>,
    generation: u64,
    in_flight: Option<u64>,
}

impl MemoryChannel {
    fn check_alive(&self, state: &QueueState) -> Result<(), BrokerError> {
        if state.offline || state.generation != self.generation {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        if let Some(tag) = self.in_flight.take() {
            let requeued = lock(&self.shared).requeue(tag);
            if requeued {
                self.shared.notify.notify_one();
            }
        }
    }
}

#[async_trait::async_trait]
impl Channel for MemoryChannel {
    async fn publish(&mut self, message: &Message) -> Result<(), BrokerError> {
        {
            let mut state = lock(&self.shared);
            self.check_alive(&state)?;
            state.ready.push_back(Stored {
                message: message.clone(),
                redelivered: false,
            });
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError> {
        if self.in_flight.is_some() {
            return Err(BrokerError::Consume(
                "prefetch limit reached, settle the outstanding delivery first".to_string(),
            ));
        }

        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = lock(&self.shared);
                self.check_alive(&state)?;
                if let Some(stored) = state.ready.pop_front() {
                    let tag = state.next_tag;
                    state.next_tag += 1;
                    state.unacked.insert(tag, stored.clone());
                    self.in_flight = Some(tag);
                    return Ok(Some(Delivery {
                        tag,
                        message: stored.message,
                        redelivered: stored.redelivered,
                    }));
                }
            }
            notified.await;
        }
    }

    async fn settle(&mut self, tag: u64, disposition: Disposition) -> Result<(), BrokerError> {
        if self.in_flight != Some(tag) {
            return Err(BrokerError::Consume(format!("unknown delivery tag {tag}")));
        }

        let requeued = {
            let mut state = lock(&self.shared);
            // An outage already handed the delivery back to the queue.
            self.check_alive(&state)?;
            self.in_flight = None;
            match disposition {
                Disposition::Ack | Disposition::Discard => {
                    state.unacked.remove(&tag);
                    false
                }
                Disposition::Requeue => state.requeue(tag),
            }
        };
        if requeued {
            self.shared.notify.notify_one();
        }
        Ok(())
    }
}
