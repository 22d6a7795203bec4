#![forbid(unsafe_code)]

use linkdb_kernel_contracts::device_addr::DeviceAddr;
use linkdb_kernel_contracts::link_entry::GroupNumber;
use linkdb_storage::config::DeviceDbStoreConfig;
use linkdb_storage::device_db::DeviceDb;

pub const USAGE: &str =
    "usage: linkdb <show|find|group|clear> <device> [peer|-] [group|-] [ctrl|resp|-]";

/// Runs one inspection command against the snapshot of `<device>` and
/// returns the text to print. Nothing here talks to the device.
pub fn execute_db_command(
    config: &DeviceDbStoreConfig,
    subcommand: &str,
    args: &[&str],
) -> Result<String, String> {
    let device = parse_device(args.first().copied())?;
    match subcommand {
        "show" => {
            let db = open(config, device)?;
            Ok(db.to_string().trim_end().to_string())
        }
        "find" => {
            let db = open(config, device)?;
            let peer = optional(args.get(1).copied())
                .map(|raw| DeviceAddr::parse(raw).map_err(|e| format!("bad peer: {e}")))
                .transpose()?;
            let group = optional(args.get(2).copied())
                .map(|raw| GroupNumber::parse(raw).map_err(|e| format!("bad group: {e}")))
                .transpose()?;
            let role = optional(args.get(3).copied()).map(parse_role).transpose()?;
            let lines: Vec<String> = db
                .find_all(peer, group, role)
                .into_iter()
                .map(ToString::to_string)
                .collect();
            if lines.is_empty() {
                Ok("NONE".to_string())
            } else {
                Ok(lines.join("\n"))
            }
        }
        "group" => {
            let raw = args
                .get(1)
                .ok_or_else(|| "usage: linkdb group <device> <group>".to_string())?;
            let group = GroupNumber::parse(raw).map_err(|e| format!("bad group: {e}"))?;
            let db = open(config, device)?;
            let peers: Vec<String> = db
                .find_group(group)
                .iter()
                .map(|e| e.addr.to_string())
                .collect();
            Ok(peers.join("\n"))
        }
        "clear" => {
            let mut db = open(config, device)?;
            db.clear()
                .map_err(|e| format!("failed to clear device db: {e}"))?;
            Ok("OK".to_string())
        }
        _ => Err(format!(
            "unknown subcommand: {subcommand}. expected one of: show, find, group, clear"
        )),
    }
}

fn parse_device(raw: Option<&str>) -> Result<DeviceAddr, String> {
    let raw = raw.ok_or_else(|| USAGE.to_string())?;
    DeviceAddr::parse(raw).map_err(|e| format!("bad device address '{raw}': {e}"))
}

fn open(config: &DeviceDbStoreConfig, device: DeviceAddr) -> Result<DeviceDb, String> {
    config
        .open_device_db(device)
        .map_err(|e| format!("failed to open device db: {e}"))
}

fn optional(raw: Option<&str>) -> Option<&str> {
    raw.filter(|v| *v != "-")
}

fn parse_role(raw: &str) -> Result<bool, String> {
    match raw {
        "ctrl" => Ok(true),
        "resp" => Ok(false),
        _ => Err(format!("bad role '{raw}'. expected ctrl or resp")),
    }
}
