//! End-to-end policy loading, migration, and persistence.

use std::fs;

use attest_bridge::policy::{Policy, GENERATOR_MIGRATION, POLICY_FILENAME};

#[test]
fn legacy_allowlist_migrates_and_persists_as_json() {
    let dir = tempfile::TempDir::new().unwrap();
    let legacy = dir.path().join("allowlist.txt");
    fs::write(
        &legacy,
        "deadbeef /bin/x\nfeedface %keyring:trusted\ncafebabe /bin/x\n",
    )
    .unwrap();

    let mut policy = Policy::load(Some(&legacy)).unwrap();
    assert_eq!(policy.meta.generator, GENERATOR_MIGRATION);
    assert_eq!(
        policy.hashes.get("/bin/x").unwrap(),
        &vec!["deadbeef".to_owned(), "cafebabe".to_owned()]
    );
    assert_eq!(
        policy.keyrings.get("trusted").unwrap(),
        &vec!["feedface".to_owned()]
    );

    policy.append("/usr/bin/app", "abc123");

    let destination = dir.path().join(POLICY_FILENAME);
    policy.persist(&destination).unwrap();

    // The persisted document reloads as the current schema, unchanged.
    let reloaded = Policy::load(Some(&destination)).unwrap();
    assert_eq!(reloaded.hashes, policy.hashes);
    assert_eq!(reloaded.keyrings, policy.keyrings);
    assert_eq!(
        reloaded.hashes.get("/usr/bin/app").unwrap(),
        &vec!["abc123".to_owned()]
    );
}

#[test]
fn migration_survives_a_second_cycle_without_drift() {
    let dir = tempfile::TempDir::new().unwrap();
    let legacy = dir.path().join("allowlist.txt");
    fs::write(&legacy, "h1 /b\nh2 /a\nh3 /b\n").unwrap();

    let first = Policy::load(Some(&legacy)).unwrap();
    let path = dir.path().join(POLICY_FILENAME);
    first.persist(&path).unwrap();

    let second = Policy::load(Some(&path)).unwrap();
    let repersisted = dir.path().join("again.json");
    second.persist(&repersisted).unwrap();

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        fs::read_to_string(&repersisted).unwrap()
    );
    // Insertion order is preserved across the cycle.
    let paths: Vec<_> = second.hashes.keys().cloned().collect();
    assert_eq!(paths, vec!["/b".to_owned(), "/a".to_owned()]);
}

#[test]
fn malformed_legacy_lines_are_skipped_without_aborting() {
    let dir = tempfile::TempDir::new().unwrap();
    let legacy = dir.path().join("allowlist.txt");
    fs::write(&legacy, "orphanhash\n\nabc123 /bin/ok\n").unwrap();

    let policy = Policy::load(Some(&legacy)).unwrap();
    assert_eq!(policy.hashes.len(), 1);
    assert!(policy.hashes.contains_key("/bin/ok"));
}
