//! Durable in-process publish/subscribe for the baseline proxy
//!
//! The bus provides at-least-once delivery with per-subject consumer
//! groups: bounded in-flight deliveries, an ack-wait timeout after which a
//! delivery is treated as nak'd, bounded redelivery, and dead-lettering for
//! messages that exhaust their deliveries or fail permanently.
//!
//! Handlers return a [`Disposition`]: `Ack` removes the message, `Nak`
//! requeues it with backoff, and `Term` dead-letters it immediately (for
//! permanent semantic failures such as an unknown opcode).

#![deny(unsafe_code)]

mod bus;
pub mod subject;

pub use bus::{BusError, Delivery, Disposition, MessageBus, MessageHandler, Result, SubjectStats};
pub use subject::ConsumerConfig;
