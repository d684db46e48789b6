//! The message bus implementation

use crate::subject::ConsumerConfig;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore};
use tokio::time::timeout;

/// Bus errors
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("subject channel closed: {0}")]
    Closed(String),
}

/// Result type for bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Outcome of handling one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Message handled; remove it
    Ack,
    /// Transient failure; requeue with backoff, bounded by max-deliveries
    Nak,
    /// Permanent failure; dead-letter immediately
    Term,
}

/// One delivery attempt of a published message
#[derive(Debug, Clone)]
pub struct Delivery {
    pub subject: String,
    pub payload: Vec<u8>,
    /// 1-based delivery attempt
    pub deliveries: u32,
}

/// Subject consumer callback
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Disposition;
}

/// Per-subject delivery counters
#[derive(Debug, Default, Clone)]
pub struct SubjectStats {
    pub published: u64,
    pub delivered: u64,
    pub acked: u64,
    pub terminated: u64,
    pub dead_lettered: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    acked: AtomicU64,
    terminated: AtomicU64,
    dead_lettered: AtomicU64,
}

struct Envelope {
    payload: Vec<u8>,
    deliveries: u32,
}

struct Subject {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Envelope>>>,
    counters: Counters,
    dead_letters: Mutex<Vec<Vec<u8>>>,
}

impl Subject {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(AsyncMutex::new(rx)),
            counters: Counters::default(),
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    fn dead_letter(&self, payload: Vec<u8>) {
        self.dead_letters
            .lock()
            .expect("dead letter buffer poisoned")
            .push(payload);
    }
}

/// Durable at-least-once publish/subscribe with per-subject consumer groups
#[derive(Clone)]
pub struct MessageBus {
    subjects: Arc<DashMap<String, Arc<Subject>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            subjects: Arc::new(DashMap::new()),
        }
    }

    fn subject(&self, name: &str) -> Arc<Subject> {
        self.subjects
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Subject::new()))
            .clone()
    }

    /// Publish raw bytes to a subject; messages queue until consumed
    pub fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let state = self.subject(subject);
        state
            .tx
            .send(Envelope {
                payload,
                deliveries: 0,
            })
            .map_err(|_| BusError::Closed(subject.to_string()))?;
        state.counters.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Spawn `workers` pull-consumers for a subject
    ///
    /// Each worker delivers one message at a time; a handler exceeding the
    /// configured ack-wait is treated as nak'd and the message redelivered.
    pub fn subscribe(
        &self,
        subject: &str,
        config: ConsumerConfig,
        workers: usize,
        handler: Arc<dyn MessageHandler>,
    ) {
        let state = self.subject(subject);
        let in_flight = Arc::new(Semaphore::new(config.max_in_flight));

        for _ in 0..workers.max(1) {
            let state = state.clone();
            let config = config.clone();
            let handler = handler.clone();
            let in_flight = in_flight.clone();
            let subject = subject.to_string();

            tokio::spawn(async move {
                loop {
                    let envelope = { state.rx.lock().await.recv().await };
                    let Some(envelope) = envelope else { break };

                    let _permit = in_flight
                        .acquire()
                        .await
                        .expect("in-flight semaphore closed");

                    let deliveries = envelope.deliveries + 1;
                    state.counters.delivered.fetch_add(1, Ordering::Relaxed);

                    let delivery = Delivery {
                        subject: subject.clone(),
                        payload: envelope.payload,
                        deliveries,
                    };

                    let disposition = match timeout(config.ack_wait, handler.handle(&delivery)).await
                    {
                        Ok(disposition) => disposition,
                        Err(_) => {
                            tracing::warn!(
                                subject = %subject,
                                deliveries,
                                "handler exceeded ack-wait; redelivering"
                            );
                            Disposition::Nak
                        }
                    };

                    match disposition {
                        Disposition::Ack => {
                            state.counters.acked.fetch_add(1, Ordering::Relaxed);
                        }
                        Disposition::Term => {
                            tracing::warn!(subject = %subject, "message terminated; dead-lettering");
                            state.counters.terminated.fetch_add(1, Ordering::Relaxed);
                            state.dead_letter(delivery.payload);
                        }
                        Disposition::Nak => {
                            if deliveries >= config.max_deliveries {
                                tracing::warn!(
                                    subject = %subject,
                                    deliveries,
                                    "message exhausted max deliveries; dead-lettering"
                                );
                                state.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                                state.dead_letter(delivery.payload);
                            } else {
                                let tx = state.tx.clone();
                                let backoff = redelivery_backoff(deliveries);
                                let payload = delivery.payload;
                                tokio::spawn(async move {
                                    tokio::time::sleep(backoff).await;
                                    let _ = tx.send(Envelope {
                                        payload,
                                        deliveries,
                                    });
                                });
                            }
                        }
                    }
                }
            });
        }
    }

    /// Relay every message published to `from` into `to`
    ///
    /// Used for the non-durable `baseline` subject: peer deliveries are
    /// immediately re-published to the durable inbound stream.
    pub fn relay(&self, from: &str, to: &str) {
        let handler = Arc::new(RelayHandler {
            bus: self.clone(),
            to: to.to_string(),
        });
        self.subscribe(from, ConsumerConfig::default(), 1, handler);
    }

    /// Snapshot of a subject's delivery counters
    pub fn stats(&self, subject: &str) -> SubjectStats {
        let state = self.subject(subject);
        SubjectStats {
            published: state.counters.published.load(Ordering::Relaxed),
            delivered: state.counters.delivered.load(Ordering::Relaxed),
            acked: state.counters.acked.load(Ordering::Relaxed),
            terminated: state.counters.terminated.load(Ordering::Relaxed),
            dead_lettered: state.counters.dead_lettered.load(Ordering::Relaxed),
        }
    }

    /// Dead-lettered payloads for a subject, oldest first
    pub fn dead_letters(&self, subject: &str) -> Vec<Vec<u8>> {
        self.subject(subject)
            .dead_letters
            .lock()
            .expect("dead letter buffer poisoned")
            .clone()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

struct RelayHandler {
    bus: MessageBus,
    to: String,
}

#[async_trait]
impl MessageHandler for RelayHandler {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        tracing::debug!(
            bytes = delivery.payload.len(),
            from = %delivery.subject,
            to = %self.to,
            "relaying inbound protocol message"
        );
        match self.bus.publish(&self.to, delivery.payload.clone()) {
            Ok(()) => Disposition::Ack,
            Err(err) => {
                tracing::warn!(error = %err, "failed to relay inbound protocol message");
                Disposition::Nak
            }
        }
    }
}

/// Linear redelivery backoff, capped
fn redelivery_backoff(deliveries: u32) -> Duration {
    Duration::from_millis((25 * deliveries as u64).min(250))
}
