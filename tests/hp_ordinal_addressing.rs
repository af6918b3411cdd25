// Copyright (c) 2024-present, ixdb contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Heap file ordinal addressing across block boundaries and reopen.

use ixdb::{Error, Hp, Record};
use test_log::test;

/// `GetEntry(rowId)` must return the `rowId`-th inserted record, for a
/// span of inserts that crosses several data-block boundaries.
#[test]
fn get_entry_returns_the_nth_inserted_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("hp.db");

    let mut hp = Hp::<96>::new(8);
    hp.create_file(&path).unwrap();
    let fd = hp.open_file(&path).unwrap();

    for i in 0..100 {
        let record = Record::new(i, b"Name", format!("Surname{i}").as_bytes(), b"City");
        hp.insert_entry(fd, &record).unwrap();
    }

    for i in 0..100 {
        let record = hp.get_entry(fd, i as u32).unwrap();
        assert_eq!(record.id, i);
        assert_eq!(Record::trimmed(&record.surname), format!("Surname{i}"));
    }

    hp.close_file(fd).unwrap();
}

/// A heap file survives a close/reopen cycle with ordinal addressing
/// intact.
#[test]
fn ordinal_addressing_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("hp.db");

    {
        let mut hp = Hp::<128>::new(8);
        hp.create_file(&path).unwrap();
        let fd = hp.open_file(&path).unwrap();
        for i in 0..12 {
            hp.insert_entry(fd, &Record::new(i, b"A", b"B", b"C")).unwrap();
        }
        hp.close_file(fd).unwrap();
    }

    let mut hp = Hp::<128>::new(8);
    let fd = hp.open_file(&path).unwrap();
    let record = hp.get_entry(fd, 7).unwrap();
    assert_eq!(record.id, 7);
    hp.close_file(fd).unwrap();
}

/// An unopened descriptor is always `InvalidDescriptor`, never a panic.
#[test]
fn operating_on_a_closed_descriptor_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("hp.db");

    let mut hp = Hp::<128>::new(8);
    hp.create_file(&path).unwrap();
    let fd = hp.open_file(&path).unwrap();
    hp.close_file(fd).unwrap();

    assert!(matches!(hp.get_entry(fd, 0), Err(Error::InvalidDescriptor)));
}
