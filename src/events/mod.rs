pub mod bus;
pub mod emission;
pub mod memory;
pub mod processor;
pub mod redis;
pub mod transport;

pub use bus::EventBus;
pub use emission::{EmissionMetadata, with_event_emission};
pub use memory::InMemoryStreamTransport;
pub use processor::EventProcessor;
pub use redis::RedisStreamTransport;
pub use transport::{StreamMessage, StreamTransport};
