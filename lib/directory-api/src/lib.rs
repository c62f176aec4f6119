//! Service directory API types
//!
//! This library defines the data exchanged with the service directory:
//! - ServiceRecord: A registered service instance
//! - Query: A partially-specified filter over record fields
//! - Event: A registration or deregistration notification

pub mod event;
pub mod field;
pub mod query;
pub mod record;

pub use event::{Action, Event};
pub use field::Field;
pub use query::Query;
pub use record::ServiceRecord;
