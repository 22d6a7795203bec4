#![forbid(unsafe_code)]

pub mod common;
pub mod db_write;
pub mod device_addr;
pub mod link_entry;

pub use common::{ContractViolation, ReasonCodeId, Validate};
