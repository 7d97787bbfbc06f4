//! Project root and auxiliary-path discovery.
//!
//! Both walks start at a candidate path and climb toward the filesystem
//! root, accepting the first directory that satisfies the predicate. For a
//! project root the predicate is a `release.py` carrying a `version_info`
//! tuple; for an auxiliary path it is "holds at least one service module"
//! (a subdirectory with an `__manifest__.py` file).

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

/// File that marks a project root.
pub const VERSION_MARKER: &str = "release.py";
/// File that marks a directory as a service module.
pub const MODULE_MARKER: &str = "__manifest__.py";

static VERSION_INFO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"version_info\s*=\s*\(([^)]*)\)").expect("version_info regex"));

/// A located project root and the version its marker declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProject {
    pub root: PathBuf,
    pub version: String,
}

/// Walk from `start` upward and return the first directory whose probe
/// matches, together with the probe's result.
fn walk_ancestors<T>(
    start: &Path,
    mut probe: impl FnMut(&Path) -> Option<T>,
) -> Option<(PathBuf, T)> {
    let mut dir = Some(start);
    while let Some(candidate) = dir {
        if let Some(found) = probe(candidate) {
            return Some((candidate.to_path_buf(), found));
        }
        dir = candidate.parent();
    }
    None
}

/// Find the nearest marker-bearing ancestor of `start` (including `start`
/// itself) and the version it declares.
#[must_use]
pub fn find_project_root(start: &Path) -> Option<ResolvedProject> {
    walk_ancestors(start, read_marker_version).map(|(root, version)| {
        debug!(root = %root.display(), %version, "Resolved project root");
        ResolvedProject { root, version }
    })
}

/// Find the nearest ancestor of `start` (including `start` itself) that
/// holds at least one service module.
#[must_use]
pub fn find_module_root(start: &Path) -> Option<PathBuf> {
    walk_ancestors(start, |dir| holds_module(dir).then_some(())).map(|(root, ())| root)
}

fn holds_module(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries
        .flatten()
        .any(|entry| entry.path().join(MODULE_MARKER).is_file())
}

fn read_marker_version(dir: &Path) -> Option<String> {
    let marker = dir.join(VERSION_MARKER);
    let text = fs::read_to_string(&marker).ok()?;
    let parsed = text.lines().find_map(parse_version_info);
    if parsed.is_none() {
        debug!(marker = %marker.display(), "Marker file has no parsable version_info");
    }
    parsed
}

/// Parse one `version_info = (major, minor, micro, level, serial, ...)` line.
///
/// The major component may be quoted and may carry a `saas~` prefix; both are
/// stripped. A non-final release level is appended as `" <level><serial>"`.
fn parse_version_info(line: &str) -> Option<String> {
    let caps = VERSION_INFO_RE.captures(line)?;
    let tuple = caps.get(1)?.as_str();
    let parts: Vec<&str> = tuple.split(',').map(str::trim).collect();
    if parts.len() < 3 {
        return None;
    }

    let major_raw = parts[0].trim_matches(|c| c == '\'' || c == '"');
    let major: u32 = major_raw.strip_prefix("saas~").unwrap_or(major_raw).parse().ok()?;
    let minor: u32 = parts[1].parse().ok()?;
    let micro: u32 = parts[2].parse().ok()?;

    let mut version = format!("{major}.{minor}.{micro}");
    if let Some(level) = parts.get(3) {
        let level = level.trim_matches(|c| c == '\'' || c == '"');
        if !level.is_empty() && !level.eq_ignore_ascii_case("final") {
            let serial = parts.get(4).and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);
            version.push_str(&format!(" {level}{serial}"));
        }
    }
    Some(version)
}
