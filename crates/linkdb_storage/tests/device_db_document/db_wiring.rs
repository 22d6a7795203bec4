#![forbid(unsafe_code)]

use std::fs;

use linkdb_kernel_contracts::device_addr::DeviceAddr;
use linkdb_kernel_contracts::link_entry::{DbFlags, GroupNumber, LinkData, LinkEntry, MemLoc};
use linkdb_storage::config::DeviceDbStoreConfig;
use linkdb_storage::device_db::{DeviceDb, StorageError};
use linkdb_storage::document::DeviceDbDocument;

fn device() -> DeviceAddr {
    DeviceAddr::parse("3a.29.84").unwrap()
}

fn entry(mem_loc: u16, peer: &str, group: u8, flags: u8, data: [u8; 3]) -> LinkEntry {
    LinkEntry::v1(
        DeviceAddr::parse(peer).unwrap(),
        GroupNumber(group),
        MemLoc(mem_loc),
        DbFlags::from_byte(flags),
        LinkData(data),
    )
    .unwrap()
}

fn seeded_db(path: Option<std::path::PathBuf>) -> DeviceDb {
    let mut db = DeviceDb::new(device(), path);
    db.add_entry(entry(0x0ff8, "11.22.33", 1, 0xc2, [3, 28, 1])).unwrap();
    db.add_entry(entry(0x0ff0, "44.55.66", 1, 0xc2, [0, 0, 0])).unwrap();
    db.add_entry(entry(0x0fe8, "44.55.66", 2, 0x82, [255, 31, 2])).unwrap();
    db.add_entry(entry(0x0fe0, "77.88.99", 5, 0x42, [0, 0, 0])).unwrap();
    db.add_entry(entry(0x0fd8, "aa.bb.cc", 1, 0x80, [0, 0, 0])).unwrap();
    db.set_delta(Some(41)).unwrap();
    db
}

fn group_slots(db: &DeviceDb) -> Vec<(GroupNumber, Vec<MemLoc>)> {
    db.groups()
        .iter()
        .map(|(group, members)| {
            let mut slots: Vec<MemLoc> = members.iter().map(|e| e.mem_loc).collect();
            slots.sort();
            (*group, slots)
        })
        .collect()
}

#[test]
fn at_device_db_doc_01_round_trip_reproduces_indices() {
    let db = seeded_db(None);
    let back = DeviceDb::from_document(db.to_document(), None).unwrap();

    assert_eq!(back.addr(), db.addr());
    assert_eq!(back.delta(), Some(41));
    assert_eq!(
        back.entries().collect::<Vec<_>>(),
        db.entries().collect::<Vec<_>>()
    );
    assert_eq!(
        back.unused().collect::<Vec<_>>(),
        db.unused().collect::<Vec<_>>()
    );
    assert_eq!(group_slots(&back), group_slots(&db));
    assert_eq!(back.mem_locs(), db.mem_locs());
    assert_eq!(back.to_document(), db.to_document());
}

#[test]
fn at_device_db_doc_02_json_shape() {
    let doc = seeded_db(None).to_document();
    let v = serde_json::to_value(&doc).unwrap();

    assert_eq!(v["address"], "3a.29.84");
    assert_eq!(v["delta"], 41);
    assert_eq!(v["used"].as_array().unwrap().len(), 4);
    assert_eq!(v["unused"].as_array().unwrap().len(), 1);
    assert_eq!(v["unused"][0]["mem_loc"], 0x0fe0);
    assert_eq!(v["unused"][0]["db_flags"]["in_use"], false);
    // used entries are written in slot order
    assert_eq!(v["used"][0]["mem_loc"], 0x0fd8);
    assert_eq!(v["used"][0]["db_flags"]["is_last_rec"], true);

    let mut empty = DeviceDb::new(device(), None);
    empty.set_delta(None).unwrap();
    let v = serde_json::to_value(empty.to_document()).unwrap();
    assert!(v["delta"].is_null());
}

#[test]
fn at_device_db_doc_03_load_from_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("3a2984.json");
    let db = seeded_db(Some(path.clone()));

    let loaded = DeviceDb::load(&path).unwrap();
    assert_eq!(loaded.save_path(), Some(path.as_path()));
    assert_eq!(loaded.to_document(), db.to_document());
    assert!(loaded.is_current(41));
    assert!(!dir.path().join("3a2984.tmp").exists());
}

#[test]
fn at_device_db_doc_04_rejects_malformed_documents() {
    let bad_addr = r#"{"address": "zz.zz.zz", "delta": null, "used": [], "unused": []}"#;
    assert!(matches!(
        DeviceDbDocument::from_json_str(bad_addr),
        Err(StorageError::Json(_))
    ));

    let zero_slot = r#"{"address": "3a.29.84", "delta": 1, "unused": [], "used": [
        {"addr": "11.22.33", "group": 1, "mem_loc": 0,
         "db_flags": {"in_use": true, "is_controller": true, "is_last_rec": true},
         "data": [0, 0, 0]}]}"#;
    assert!(matches!(
        DeviceDbDocument::from_json_str(zero_slot),
        Err(StorageError::ContractViolation(_))
    ));

    let short_data = r#"{"address": "3a.29.84", "delta": 1, "unused": [], "used": [
        {"addr": "11.22.33", "group": 1, "mem_loc": 4088,
         "db_flags": {"in_use": true, "is_controller": true, "is_last_rec": true},
         "data": [0, 0]}]}"#;
    assert!(DeviceDbDocument::from_json_str(short_data).is_err());
}

#[test]
fn at_device_db_doc_05_duplicate_slots_in_document_collapse() {
    let raw = r#"{"address": "3a.29.84", "delta": 7, "used": [
        {"addr": "11.22.33", "group": 1, "mem_loc": 4088,
         "db_flags": {"in_use": true, "is_controller": true, "is_last_rec": false},
         "data": [0, 0, 0]}],
      "unused": [
        {"addr": "11.22.33", "group": 1, "mem_loc": 4088,
         "db_flags": {"in_use": false, "is_controller": true, "is_last_rec": false},
         "data": [0, 0, 0]}]}"#;
    let doc = DeviceDbDocument::from_json_str(raw).unwrap();
    let db = DeviceDb::from_document(doc, None).unwrap();
    assert_eq!(db.len(), 0);
    assert_eq!(db.unused().count(), 1);
    assert_eq!(db.mem_locs().len(), 1);
    assert!(db.groups().is_empty());
}

#[test]
fn at_device_db_doc_06_store_config_opens_per_device_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = DeviceDbStoreConfig::for_dir(dir.path().to_path_buf());
    let path = config.path_for(device()).unwrap();
    assert_eq!(path, dir.path().join("3a2984.json"));

    let fresh = config.open_device_db(device()).unwrap();
    assert_eq!(fresh.len(), 0);
    assert_eq!(fresh.save_path(), Some(path.as_path()));
    assert!(!path.exists());

    let db = seeded_db(Some(path.clone()));
    let reopened = config.open_device_db(device()).unwrap();
    assert_eq!(reopened.to_document(), db.to_document());

    assert!(DeviceDbStoreConfig::in_memory()
        .open_device_db(device())
        .unwrap()
        .save_path()
        .is_none());
}

#[test]
fn at_device_db_doc_07_store_config_rejects_foreign_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = DeviceDbStoreConfig::for_dir(dir.path().to_path_buf());
    let other = DeviceAddr::parse("01.02.03").unwrap();

    // a snapshot for another device written under this device's name
    let foreign = DeviceDb::new(other, None);
    foreign
        .to_document()
        .write_to(&config.path_for(device()).unwrap())
        .unwrap();

    match config.open_device_db(device()) {
        Err(StorageError::AddressMismatch { expected, got }) => {
            assert_eq!(expected, device());
            assert_eq!(got, other);
        }
        res => panic!("expected address mismatch, got {res:?}"),
    }

    fs::write(config.path_for(device()).unwrap(), b"{not json").unwrap();
    assert!(matches!(
        config.open_device_db(device()),
        Err(StorageError::Json(_))
    ));
}
