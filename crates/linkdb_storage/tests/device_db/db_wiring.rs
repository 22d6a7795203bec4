#![forbid(unsafe_code)]

use linkdb_kernel_contracts::device_addr::DeviceAddr;
use linkdb_kernel_contracts::link_entry::{DbFlags, GroupNumber, LinkData, LinkEntry, MemLoc};
use linkdb_storage::device_db::DeviceDb;
use linkdb_storage::document::DeviceDbDocument;
use proptest::prelude::*;

fn device() -> DeviceAddr {
    DeviceAddr::parse("3a.29.84").unwrap()
}

fn peer(id: &str) -> DeviceAddr {
    DeviceAddr::parse(id).unwrap()
}

fn entry(
    mem_loc: u16,
    addr: DeviceAddr,
    group: u8,
    in_use: bool,
    is_controller: bool,
    data: [u8; 3],
) -> LinkEntry {
    LinkEntry::v1(
        addr,
        GroupNumber(group),
        MemLoc(mem_loc),
        DbFlags {
            in_use,
            is_controller,
            is_last_rec: false,
        },
        LinkData(data),
    )
    .unwrap()
}

fn assert_indices_consistent(db: &DeviceDb) {
    let used: Vec<MemLoc> = db.entries().map(|e| e.mem_loc).collect();
    let unused: Vec<MemLoc> = db.unused().map(|e| e.mem_loc).collect();
    for m in &used {
        assert!(!unused.contains(m), "slot {m} is both used and unused");
    }
    let mut all: Vec<MemLoc> = used.iter().chain(unused.iter()).copied().collect();
    all.sort();
    let known: Vec<MemLoc> = db.mem_locs().iter().copied().collect();
    assert_eq!(all, known);

    for (group, members) in db.groups() {
        assert!(!members.is_empty());
        for e in members {
            assert!(e.db_flags.is_controller);
            assert!(e.db_flags.in_use);
            assert_eq!(e.group, *group);
            assert_eq!(db.find_mem_loc(e.mem_loc), Some(e));
            assert!(!unused.contains(&e.mem_loc));
        }
    }
}

#[test]
fn at_device_db_01_duplicate_slot_last_write_wins() {
    let mut db = DeviceDb::new(device(), None);
    let a = peer("11.22.33");
    let b = peer("44.55.66");

    db.add_entry(entry(0x0ff8, a, 1, true, true, [1, 1, 1])).unwrap();
    let known_before = db.mem_locs().len();
    db.add_entry(entry(0x0ff8, b, 2, true, false, [2, 2, 2])).unwrap();

    assert_eq!(db.mem_locs().len(), known_before);
    assert_eq!(db.len(), 1);
    let got = db.find_mem_loc(MemLoc(0x0ff8)).unwrap();
    assert_eq!(got.addr, b);
    assert_eq!(got.data, LinkData([2, 2, 2]));
    // the controller entry that used to live at 0x0ff8 is gone from the index
    assert!(db.find_group(GroupNumber(1)).is_empty());
    assert_indices_consistent(&db);
}

#[test]
fn at_device_db_02_group_index_tracks_controllers_only() {
    let mut db = DeviceDb::new(device(), None);
    let a = peer("11.22.33");
    let b = peer("44.55.66");

    db.add_entry(entry(0x0ff8, a, 1, true, true, [0, 0, 0])).unwrap();
    db.add_entry(entry(0x0ff0, b, 1, true, true, [0, 0, 0])).unwrap();
    db.add_entry(entry(0x0fe8, b, 1, true, false, [0, 0, 0])).unwrap();

    let members: Vec<DeviceAddr> = db
        .find_group(GroupNumber(1))
        .iter()
        .map(|e| e.addr)
        .collect();
    assert_eq!(members, vec![a, b]);
    assert!(db.find_group(GroupNumber(9)).is_empty());

    // freeing a controller slot removes it from its group
    db.add_entry(entry(0x0ff8, a, 1, false, true, [0, 0, 0])).unwrap();
    let members: Vec<DeviceAddr> = db
        .find_group(GroupNumber(1))
        .iter()
        .map(|e| e.addr)
        .collect();
    assert_eq!(members, vec![b]);
    assert_indices_consistent(&db);
}

#[test]
fn at_device_db_03_find_queries() {
    let mut db = DeviceDb::new(device(), None);
    let a = peer("11.22.33");
    let b = peer("44.55.66");
    db.add_entry(entry(0x0ff8, a, 1, true, true, [0, 0, 0])).unwrap();
    db.add_entry(entry(0x0ff0, a, 1, true, false, [0, 0, 0])).unwrap();
    db.add_entry(entry(0x0fe8, b, 2, true, false, [0, 0, 0])).unwrap();
    db.add_entry(entry(0x0fe0, b, 2, false, false, [0, 0, 0])).unwrap();

    assert_eq!(
        db.find(a, GroupNumber(1), true).unwrap().mem_loc,
        MemLoc(0x0ff8)
    );
    assert_eq!(
        db.find(a, GroupNumber(1), false).unwrap().mem_loc,
        MemLoc(0x0ff0)
    );
    assert!(db.find(b, GroupNumber(1), false).is_none());
    assert!(db.find_mem_loc(MemLoc(0x0fe0)).is_none());

    assert_eq!(db.find_all(None, None, None).len(), 3);
    assert_eq!(db.find_all(Some(a), None, None).len(), 2);
    assert_eq!(db.find_all(None, Some(GroupNumber(2)), None).len(), 1);
    assert_eq!(db.find_all(Some(a), None, Some(false)).len(), 1);
    assert!(db
        .find_all(Some(b), Some(GroupNumber(1)), Some(true))
        .is_empty());
    assert_eq!(db.len(), 3);
}

#[test]
fn at_device_db_04_delta_is_current() {
    let mut db = DeviceDb::new(device(), None);
    assert!(!db.is_current(0));
    db.set_delta(Some(5)).unwrap();
    assert!(db.is_current(5));
    assert!(!db.is_current(6));
    db.set_delta(None).unwrap();
    assert_eq!(db.delta(), None);
}

#[test]
fn at_device_db_05_mutations_write_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("3a2984.json");
    let mut db = DeviceDb::new(device(), Some(path.clone()));

    db.set_delta(None).unwrap();
    assert!(!path.exists(), "clearing the delta must not write");

    db.add_entry(entry(0x0ff8, peer("11.22.33"), 1, true, true, [1, 2, 3])).unwrap();
    let doc = DeviceDbDocument::read_from(&path).unwrap();
    assert_eq!(doc.used.len(), 1);
    assert_eq!(doc.delta, None);

    db.set_delta(Some(12)).unwrap();
    let doc = DeviceDbDocument::read_from(&path).unwrap();
    assert_eq!(doc.delta, Some(12));
}

#[test]
fn at_device_db_06_clear_drops_state_and_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("3a2984.json");
    let mut db = DeviceDb::new(device(), Some(path.clone()));
    db.add_entry(entry(0x0ff8, peer("11.22.33"), 1, true, true, [0, 0, 0])).unwrap();
    db.add_entry(entry(0x0ff0, peer("11.22.33"), 1, false, true, [0, 0, 0])).unwrap();
    db.set_delta(Some(3)).unwrap();
    assert!(path.exists());

    db.clear().unwrap();
    assert!(!path.exists());
    assert_eq!(db.len(), 0);
    assert_eq!(db.unused().count(), 0);
    assert!(db.groups().is_empty());
    assert!(db.mem_locs().is_empty());
    assert_eq!(db.delta(), None);

    // clearing again with no file on disk is fine
    db.clear().unwrap();
}

#[test]
fn at_device_db_07_set_path_redirects_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = DeviceDb::new(device(), None);
    db.add_entry(entry(0x0ff8, peer("11.22.33"), 1, true, true, [0, 0, 0])).unwrap();

    let path = dir.path().join("moved.json");
    db.set_path(Some(path.clone()));
    assert_eq!(db.save_path(), Some(path.as_path()));
    db.save().unwrap();
    assert_eq!(DeviceDbDocument::read_from(&path).unwrap().used.len(), 1);
}

proptest! {
    #[test]
    fn at_device_db_08_random_inserts_keep_indices_consistent(
        ops in proptest::collection::vec(
            (0u16..8, 0u8..4, 0u8..3, any::<bool>(), any::<bool>()),
            1..64,
        )
    ) {
        let mut db = DeviceDb::new(device(), None);
        for (slot, p, group, in_use, ctrl) in ops {
            let mem_loc = 0x0ff8 - slot * 8;
            let known_before = db.mem_locs().len();
            let had_slot = db.mem_locs().contains(&MemLoc(mem_loc));
            let e = entry(mem_loc, DeviceAddr::from_bytes([1, 2, p]), group, in_use, ctrl, [0, 0, 0]);
            db.add_entry(e.clone()).unwrap();

            let grew = db.mem_locs().len() - known_before;
            prop_assert!(grew <= 1);
            prop_assert_eq!(grew == 0, had_slot);
            if in_use {
                prop_assert_eq!(db.find_mem_loc(MemLoc(mem_loc)), Some(&e));
            } else {
                prop_assert!(db.find_mem_loc(MemLoc(mem_loc)).is_none());
                prop_assert!(db.unused().any(|u| u == &e));
            }
            assert_indices_consistent(&db);
        }
    }
}
