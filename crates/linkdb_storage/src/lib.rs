#![forbid(unsafe_code)]

pub mod config;
pub mod device_db;
pub mod document;
