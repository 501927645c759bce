//! Data models shared across the engine.

pub mod connection;
pub mod outcome;
pub mod value;

pub use connection::{ConnectionDescriptor, Driver, GroupKey};
pub use outcome::{UnitOutcome, UnitStatus};
pub use value::{Params, Row, SqlValue, Values};
