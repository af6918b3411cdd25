// Copyright (c) 2024-present, ixdb contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Block-0 magic identifiers are engine-specific; opening a file with the
//! wrong engine must fail cleanly and leave both sides usable.

use ixdb::am::{FieldDesc, FieldKind};
use ixdb::{Am, Error, Ht, Hp};
use test_log::test;

#[test]
fn opening_an_am_file_as_ht_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("a.db");

    let am = Am::<512>::new(4);
    let int_desc = FieldDesc::new(FieldKind::Int, 4);
    am.create_index(&path, int_desc, int_desc).unwrap();

    let mut ht = Ht::<512>::new(4);
    assert!(matches!(ht.open_index(&path), Err(Error::IdentifierMismatch)));

    // The failed attempt must not have left a phantom descriptor behind,
    // nor corrupted the underlying file for its actual owner.
    let mut am = Am::<512>::new(4);
    let fd = am.open_index(&path).unwrap();
    am.close_index(fd).unwrap();
}

#[test]
fn opening_an_hp_file_as_am_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("h.db");

    let hp = Hp::<512>::new(4);
    hp.create_file(&path).unwrap();

    let mut am = Am::<512>::new(4);
    assert!(matches!(am.open_index(&path), Err(Error::IdentifierMismatch)));

    let mut hp = Hp::<512>::new(4);
    let fd = hp.open_file(&path).unwrap();
    hp.close_file(fd).unwrap();
}
