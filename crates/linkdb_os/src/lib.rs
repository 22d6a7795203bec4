#![forbid(unsafe_code)]

pub mod db_modify;
pub mod device_db_sync;
pub mod transport;
