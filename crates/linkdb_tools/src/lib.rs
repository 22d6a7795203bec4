#![forbid(unsafe_code)]

pub mod db_cli;
