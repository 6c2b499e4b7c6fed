pub mod consumer;
pub mod error;
pub mod sqs;

pub use consumer::{QueueConsumer, QueueMessage};
pub use error::QueueError;
pub use sqs::SqsConsumer;
