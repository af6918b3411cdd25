// Copyright (c) 2024-present, ixdb contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Hash index overflow chaining and delete/reinsert semantics.

use ixdb::{Ht, Record};
use test_log::test;

/// Two buckets and a block size that holds one record per bucket forces
/// every even id into an overflow chain off bucket 0.
#[test]
fn overflow_chain_accepts_every_insert() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ht.db");

    let mut ht = Ht::<96>::new(16);
    ht.create_index(&path, 2).unwrap();
    let fd = ht.open_index(&path).unwrap();

    for id in (0..60).step_by(2) {
        ht.insert_entry(fd, &Record::new(id, b"N", b"S", b"C")).unwrap();
    }

    for id in (0..60).step_by(2) {
        let record = ht.get_entry(fd, id).unwrap().expect("every inserted id is found");
        assert_eq!(record.id, id);
    }
    assert!(ht.get_entry(fd, 59).unwrap().is_none());

    ht.print_all_entries(fd, None).unwrap();
    ht.print_all_entries(fd, Some(58)).unwrap();
    ht.close_file(fd).unwrap();
}

/// Deleting then reinserting the same key must leave the index usable,
/// and `GetEntry` must return the reinserted payload, not the deleted one.
#[test]
fn delete_then_reinsert_replaces_the_payload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ht.db");

    let mut ht = Ht::<128>::new(16);
    ht.create_index(&path, 128).unwrap();
    let fd = ht.open_index(&path).unwrap();

    ht.insert_entry(fd, &Record::new(42, b"P.", b"", b"")).unwrap();
    ht.delete_entry(fd, 42).unwrap();
    assert!(ht.get_entry(fd, 42).unwrap().is_none());

    ht.insert_entry(fd, &Record::new(42, b"P.", b"Sherman", b"Sydney")).unwrap();
    let record = ht.get_entry(fd, 42).unwrap().expect("reinserted record must be found");
    assert_eq!(Record::trimmed(&record.surname), "Sherman");
    assert_eq!(Record::trimmed(&record.city), "Sydney");

    ht.print_all_entries(fd, Some(42)).unwrap();
    ht.close_file(fd).unwrap();
}

/// Deleting a key that was never inserted is a silent no-op, not an
/// error.
#[test]
fn deleting_a_missing_key_is_not_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ht.db");

    let mut ht = Ht::<128>::new(16);
    ht.create_index(&path, 16).unwrap();
    let fd = ht.open_index(&path).unwrap();

    ht.delete_entry(fd, 12345).unwrap();
    assert!(ht.get_entry(fd, 12345).unwrap().is_none());
    ht.print_all_entries(fd, Some(12345)).unwrap();
    ht.close_file(fd).unwrap();
}

/// An index survives a close/reopen cycle: the directory and bucket
/// contents written before close are still reachable afterward.
#[test]
fn index_survives_close_and_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ht.db");

    {
        let mut ht = Ht::<128>::new(8);
        ht.create_index(&path, 8).unwrap();
        let fd = ht.open_index(&path).unwrap();
        for id in 0..20 {
            ht.insert_entry(fd, &Record::new(id, b"N", b"S", b"C")).unwrap();
        }
        ht.close_file(fd).unwrap();
    }

    let mut ht = Ht::<128>::new(8);
    let fd = ht.open_index(&path).unwrap();
    for id in 0..20 {
        let record = ht.get_entry(fd, id).unwrap().expect("survives reopen");
        assert_eq!(record.id, id);
    }
    ht.print_all_entries(fd, None).unwrap();
    ht.close_file(fd).unwrap();
}
