#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::process::Command;
use tempfile::tempdir;

mod common;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: stock a product and leave an order awaiting payment
    let first = common::script(&[
        "product,,,1,5,4.00,,,,",
        "checkout,1,,,,,1:2,,,",
        "pay,,1,,,,,redirect,,",
    ]);
    let output1 = Command::new(cargo_bin!("orderflow"))
        .arg(first.path())
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("1,1,awaiting_payment,8,redirect,RD1-1"));

    // 2. Second run: the provider confirms, and a new order gets the next id
    let second = common::script(&[
        "callback,,1,,,,,,confirmed,",
        "checkout,2,,,,,1:1,,,",
    ]);
    let output2 = Command::new(cargo_bin!("orderflow"))
        .arg(second.path())
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);
    assert!(stdout2.contains("1,1,paid,8,redirect,RD1-1"));
    assert!(stdout2.contains("2,2,pending,4,,"));
}
