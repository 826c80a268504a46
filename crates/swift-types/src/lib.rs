//! Shared value types for the Swift storage adapter.

mod object_name;
mod valid_name;

pub use self::{object_name::ObjectName, valid_name::valid_name};
