pub mod events;

pub use events::{BusEvent, EventCategory, NormalizedEvent, WireDecodeError};
