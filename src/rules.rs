//! Parses the UID/GID -> destination rules file and drives the
//! filesystem driver to classify a task into a group.
//!
//! Continuations (`%` lines) are folded onto their parent rule's
//! `targets` list at parse time rather than kept as a separate linked
//! list.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::RwLock;

use error::{Error, ErrorKind, Result};
use fs;
use group::Cgroup;
use mount::MOUNT_TABLE;

/// Default location of the rules file, matching `CGRULES_CONF_FILE`.
pub const CGRULES_CONF_FILE: &str = "/etc/cgrules.conf";

/// Maximum accepted rule-file line length; longer lines are discarded.
pub const CGROUP_RULE_MAXLINE: usize = 2048;

/// Flags accepted by `change_cgroup`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeCgroupFlags {
    pub use_cache: bool,
}

/// Which of the two rule-matching principals a rule was resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Uid(u32),
    Gid(u32),
    Wildcard,
}

/// Either every currently-mounted controller (`*`), or an explicit
/// list of controller names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerSpec {
    All,
    Named(Vec<String>),
}

impl ControllerSpec {
    fn parse(field: &str) -> Self {
        if field == "*" {
            ControllerSpec::All
        } else {
            ControllerSpec::Named(field.split(',').map(|s| s.to_string()).collect())
        }
    }

    /// Resolves to the concrete controller names to use *right now*,
    /// expanding `All` against the mount table at call time rather
    /// than at parse time.
    pub fn resolve(&self) -> Vec<String> {
        match self {
            ControllerSpec::All => MOUNT_TABLE.all_controllers(),
            ControllerSpec::Named(v) => v.clone(),
        }
    }
}

/// One (controllers, destination) target of a rule or its
/// continuations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTarget {
    pub controllers: ControllerSpec,
    pub destination: String,
}

/// A rule: a principal plus every target line that applies to it (the
/// rule's own line, plus any `%`-continuations that followed it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub principal: Principal,
    pub raw_name: String,
    pub targets: Vec<RuleTarget>,
}

pub type RuleList = Vec<Rule>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Cache,
    Match { uid: u32, gid: u32 },
}

/// The process-wide cached rule list, guarded by its own lock
/// (independent of the mount table's lock).
static CACHED_RULES: RwLock<Vec<Rule>> = RwLock::new(Vec::new());

/// Resolves a principal token (`username`, `@groupname`, `*`) to a
/// `Principal`. Unknown users/groups return `None`, which causes the
/// caller to skip the rule and its continuation tail with a warning.
fn resolve_principal(token: &str) -> Option<Principal> {
    if token == "*" {
        Some(Principal::Wildcard)
    } else if let Some(group_name) = token.strip_prefix('@') {
        ::users::get_group_by_name(group_name).map(|g| Principal::Gid(g.gid()))
    } else {
        ::users::get_user_by_name(token).map(|u| Principal::Uid(u.uid()))
    }
}

/// True if `uid` is a member of the group named `group_name`.
fn uid_is_member_of_group(uid: u32, group_name: &str) -> bool {
    let user = match ::users::get_user_by_uid(uid) {
        Some(u) => u,
        None => return false,
    };
    let group = match ::users::get_group_by_name(group_name) {
        Some(g) => g,
        None => return false,
    };
    group
        .members()
        .iter()
        .any(|m| m.to_string_lossy() == user.name().to_string_lossy())
}

/// Parses the configuration file at `path` in either cache or match
/// mode.
///
/// * `ParseMode::Cache` parses the whole file.
/// * `ParseMode::Match { uid, gid }` stops at the first rule whose
///   principal matches, collecting that rule and its continuations.
pub fn parse_rules_file(path: &Path, mode: ParseMode) -> Result<RuleList> {
    let file = File::open(path).map_err(|_| Error::new(ErrorKind::RulesNoFile))?;
    let reader = BufReader::new(file);

    let mut rules: RuleList = Vec::new();
    let mut skipped_tail = false;
    let mut matched = false;

    for line in reader.lines() {
        let raw = line.map_err(Error::from_io)?;
        if raw.len() > CGROUP_RULE_MAXLINE {
            continue;
        }

        let line = match raw.find('#') {
            Some(i) => &raw[..i],
            None => &raw[..],
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let is_continuation = line.starts_with('%');

        if skipped_tail && is_continuation {
            continue;
        }
        skipped_tail = false;

        // Exactly three whitespace-separated tokens: principal,
        // controllers, destination.
        let mut fields = line.split_whitespace();
        let user_field = fields.next().unwrap_or("");
        let controllers_field = fields.next().unwrap_or("");
        let destination_field = fields.next().unwrap_or("");

        if user_field.is_empty() || controllers_field.is_empty() || destination_field.is_empty() {
            return Err(Error::new(ErrorKind::ParseFailed));
        }

        if let ParseMode::Match { .. } = mode {
            if matched && !is_continuation {
                break;
            }
        }

        let target = RuleTarget {
            controllers: ControllerSpec::parse(controllers_field),
            destination: destination_field.to_string(),
        };

        if is_continuation {
            if let Some(last) = rules.last_mut() {
                last.targets.push(target);
            }
            continue;
        }

        let principal = match resolve_principal(user_field) {
            Some(p) => p,
            None => {
                warn!("unknown user/group '{}', skipping rule", user_field);
                skipped_tail = true;
                continue;
            }
        };

        let is_match = match (mode, principal) {
            (ParseMode::Cache, _) => true,
            (ParseMode::Match { .. }, Principal::Wildcard) => true,
            (ParseMode::Match { uid, .. }, Principal::Uid(ruid)) => ruid == uid,
            (ParseMode::Match { gid, .. }, Principal::Gid(rgid)) => {
                rgid == gid || uid_group_membership_matches(user_field, &mode)
            }
        };

        if let ParseMode::Match { .. } = mode {
            if is_match {
                matched = true;
            } else {
                continue;
            }
        }

        rules.push(Rule {
            principal,
            raw_name: user_field.to_string(),
            targets: vec![target],
        });
    }

    Ok(rules)
}

fn uid_group_membership_matches(group_token: &str, mode: &ParseMode) -> bool {
    if let ParseMode::Match { uid, .. } = mode {
        if let Some(group_name) = group_token.strip_prefix('@') {
            return uid_is_member_of_group(*uid, group_name);
        }
    }
    false
}

/// (Re)loads the cached rule list from `CGRULES_CONF_FILE`.
pub fn reload_cached_rules() -> Result<()> {
    reload_cached_rules_from(Path::new(CGRULES_CONF_FILE))
}

/// As `reload_cached_rules`, but against an explicit path. Exposed for
/// tests that don't have write access to `/etc`.
pub fn reload_cached_rules_from(path: &Path) -> Result<()> {
    let parsed = parse_rules_file(path, ParseMode::Cache)?;
    let mut guard = CACHED_RULES.write().unwrap();
    *guard = parsed;
    Ok(())
}

/// Loads the cached rule list if it has never been loaded.
pub fn init_rules_cache() -> Result<()> {
    if CACHED_RULES.read().unwrap().is_empty() {
        reload_cached_rules()
    } else {
        Ok(())
    }
}

/// Finds the first cached rule matching `(uid, gid)` plus its
/// continuations.
fn find_matching_cached_rule(uid: u32, gid: u32) -> Option<Rule> {
    let guard = CACHED_RULES.read().unwrap();
    guard.iter().find_map(|rule| {
        let is_match = match rule.principal {
            Principal::Wildcard => true,
            Principal::Uid(ruid) => ruid == uid,
            Principal::Gid(rgid) => {
                rgid == gid || uid_is_member_of_group(uid, rule.raw_name.trim_start_matches('@'))
            }
        };
        if is_match {
            Some(rule.clone())
        } else {
            None
        }
    })
}

/// Classifies `pid` (owned by `uid`/`gid`) into a destination group
/// per the matching rule, then attaches it.
///
/// Each of the winning rule's targets produces one `attach`; a failing
/// attach aborts the remaining targets immediately.
pub fn change_cgroup(uid: u32, gid: u32, pid: i32, flags: ChangeCgroupFlags) -> Result<()> {
    ::check_initialized()?;
    let rule = if flags.use_cache {
        find_matching_cached_rule(uid, gid)
    } else {
        let parsed = parse_rules_file(Path::new(CGRULES_CONF_FILE), ParseMode::Match { uid, gid })?;
        parsed.into_iter().next()
    };

    let rule = match rule {
        Some(r) => r,
        None => return Ok(()),
    };

    for target in &rule.targets {
        let mut group = Cgroup::new(target.destination.clone());
        for controller in target.controllers.resolve() {
            group.add_controller(controller)?;
        }
        fs::attach(Some(&group), pid)?;
    }

    Ok(())
}

/// Backward-compatible entry point equivalent to `change_cgroup` with
/// `flags = 0` (not using the cache).
pub fn change_cgroup_uid_gid(uid: u32, gid: u32, pid: i32) -> Result<()> {
    change_cgroup(uid, gid, pid, ChangeCgroupFlags::default())
}

/// Directly attaches `pid` under `dest` for each controller named in
/// `controllers`, bypassing rule matching entirely.
pub fn change_cgroup_path(dest: &str, pid: i32, controllers: &[String]) -> Result<()> {
    ::check_initialized()?;
    let mut group = Cgroup::new(dest.to_string());
    for controller in controllers {
        group.add_controller(controller.clone())?;
    }
    fs::attach(Some(&group), pid)
}

/// Dumps the cached rule list in the rules-file's own syntax, useful
/// for diagnostics and tests.
pub fn print_rules_config<W: Write>(out: &mut W) -> io::Result<()> {
    let guard = CACHED_RULES.read().unwrap();
    for rule in guard.iter() {
        for (i, target) in rule.targets.iter().enumerate() {
            let principal = if i == 0 {
                rule.raw_name.clone()
            } else {
                format!("%{}", rule.raw_name)
            };
            let controllers = match &target.controllers {
                ControllerSpec::All => "*".to_string(),
                ControllerSpec::Named(names) => names.join(","),
            };
            writeln!(out, "{}\t{}\t{}", principal, controllers, target.destination)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn write_tmp(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn wildcard_rule_always_matches() {
        let f = write_tmp("* cpu /default\n");
        let rules = parse_rules_file(f.path(), ParseMode::Match { uid: 1000, gid: 1000 }).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].principal, Principal::Wildcard);
    }

    #[test]
    fn continuation_is_folded_into_targets() {
        let f = write_tmp("* c1 /g1\n% c2 /g2\n");
        let rules = parse_rules_file(f.path(), ParseMode::Cache).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].targets.len(), 2);
        assert_eq!(rules[0].targets[0].destination, "/g1");
        assert_eq!(rules[0].targets[1].destination, "/g2");
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let f = write_tmp("# a comment\n\n   \n* cpu /x # trailing\n");
        let rules = parse_rules_file(f.path(), ParseMode::Cache).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].targets[0].destination, "/x");
    }

    #[test]
    fn controller_spec_parses_wildcard_and_list() {
        assert_eq!(ControllerSpec::parse("*"), ControllerSpec::All);
        assert_eq!(
            ControllerSpec::parse("cpu,memory"),
            ControllerSpec::Named(vec!["cpu".to_string(), "memory".to_string()])
        );
    }
}
