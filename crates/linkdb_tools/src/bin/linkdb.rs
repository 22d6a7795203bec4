#![forbid(unsafe_code)]

use std::env;

use linkdb_storage::config::DeviceDbStoreConfig;
use linkdb_tools::db_cli::{execute_db_command, USAGE};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let (subcommand, rest) = args.split_first().ok_or_else(|| USAGE.to_string())?;
    let rest: Vec<&str> = rest.iter().map(String::as_str).collect();

    let config = DeviceDbStoreConfig::default_local();
    let output = execute_db_command(&config, subcommand, &rest)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
