//! Integration tests for the rule engine end to end. Uses the real
//! calling user/group so principal resolution succeeds without
//! fabricating system accounts, and a temporary rules file so these
//! don't touch `/etc/cgrules.conf`.

use libcgroup_rs::init;
use libcgroup_rs::rules::{self, ChangeCgroupFlags};
use std::io::Write;

fn setup() {
    init().expect("a cgroup v1 hierarchy must be mounted to run these tests");
}

fn current_uid_gid() -> (u32, u32) {
    (nix::unistd::getuid().as_raw(), nix::unistd::getgid().as_raw())
}

#[test]
fn wildcard_rule_wins_when_listed_first() {
    setup();

    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "* cpu /libcgroup_rs_test_wildcard_first").unwrap();
    writeln!(f, "root cpu /libcgroup_rs_test_wildcard_first_alt").unwrap();

    let rules = rules::parse_rules_file(f.path(), rules::ParseMode::Cache).unwrap();
    assert_eq!(rules.len(), 2);

    let (uid, gid) = current_uid_gid();
    let matched = rules::parse_rules_file(
        f.path(),
        rules::ParseMode::Match { uid, gid },
    )
    .unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].targets[0].destination, "/libcgroup_rs_test_wildcard_first");
}

#[test]
fn continuation_produces_two_attach_targets() {
    setup();

    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "* cpu /libcgroup_rs_test_g1").unwrap();
    writeln!(f, "% cpu /libcgroup_rs_test_g2").unwrap();

    let (uid, gid) = current_uid_gid();
    let matched = rules::parse_rules_file(
        f.path(),
        rules::ParseMode::Match { uid, gid },
    )
    .unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].targets.len(), 2);
    assert_eq!(matched[0].targets[0].destination, "/libcgroup_rs_test_g1");
    assert_eq!(matched[0].targets[1].destination, "/libcgroup_rs_test_g2");
}

#[test]
fn change_cgroup_path_attaches_directly() {
    setup();

    let pid = std::process::id() as i32;
    rules::change_cgroup_path(
        "libcgroup_rs_test_direct",
        pid,
        &["cpu".to_string()],
    )
    .expect("direct attach");

    let tasks_path = libcgroup_rs::MOUNT_TABLE
        .resolve("cpu", "libcgroup_rs_test_direct")
        .unwrap()
        .join("tasks");
    let attached: Vec<i32> = libcgroup_rs::iter::TaskIterator::new(&tasks_path)
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    assert!(attached.contains(&pid));
}

#[test]
fn change_cgroup_with_cache_flag_uses_current_mount_table() {
    setup();

    let mut f = tempfile::NamedTempFile::new().unwrap();
    let (uid, gid) = current_uid_gid();
    writeln!(f, "* * /libcgroup_rs_test_cache").unwrap();
    rules::reload_cached_rules_from(f.path()).expect("cache load");

    let pid = std::process::id() as i32;
    let flags = ChangeCgroupFlags { use_cache: true };
    rules::change_cgroup(uid, gid, pid, flags).expect("classify via cache");
}
