//! Background services

pub mod synthetic;

pub use synthetic::{SyntheticProducer, SyntheticProducerHandle};
