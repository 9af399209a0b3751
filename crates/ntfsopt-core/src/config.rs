//! Job configuration: the filter, sorting and scheduling options a caller
//! can set (spec §6 Configuration table), plus the byte-size and duration
//! parsers those options are expressed in.
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sort key used by OPTIMIZE to decide placement order (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    Path,
    Size,
    CreationTime,
    ModificationTime,
    AccessTime,
}

/// Sort direction paired with [`SortKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One path filter: a literal path prefix/pattern using `?`/`*` wildcards,
/// matched case-insensitively against a file's full path (spec §6 `IN_FILTER`
/// / `EX_FILTER`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathPattern(pub String);

impl PathPattern {
    /// `?` matches exactly one character, `*` matches any run of characters
    /// (including zero), matching is case-insensitive. This is the classic
    /// DOS wildcard grammar the original tool exposes through `IN_FILTER`/
    /// `EX_FILTER`.
    pub fn matches(&self, path: &str) -> bool {
        wildcard_match(&self.0.to_ascii_lowercase(), &path.to_ascii_lowercase())
    }
}

fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    wildcard_match_inner(&pattern, &text)
}

/// Classic recursive-with-backtracking glob matcher over `?`/`*`.
fn wildcard_match_inner(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => {
            // Try matching zero characters, then progressively more.
            wildcard_match_inner(&pattern[1..], text)
                || (!text.is_empty() && wildcard_match_inner(pattern, &text[1..]))
        }
        Some('?') => !text.is_empty() && wildcard_match_inner(&pattern[1..], &text[1..]),
        Some(c) => text.first() == Some(c) && wildcard_match_inner(&pattern[1..], &text[1..]),
    }
}

/// Parse a list of `;`-separated patterns (spec §6 `IN_FILTER`/`EX_FILTER`).
pub fn parse_pattern_list(s: &str) -> Vec<PathPattern> {
    s.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| PathPattern(p.to_string()))
        .collect()
}

/// Parse a byte size with an optional suffix (`KB MB GB TB PB EB`), spec §6
/// "Byte sizes accept suffixes". Bare numbers are bytes. Case-insensitive,
/// optional `B` suffix on the suffix itself (`K`, `KB` both accepted).
pub fn parse_byte_size(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let upper = s.to_ascii_uppercase();
    const UNITS: &[(&str, u64)] = &[
        ("EB", 1u64 << 60),
        ("PB", 1u64 << 50),
        ("TB", 1u64 << 40),
        ("GB", 1u64 << 30),
        ("MB", 1u64 << 20),
        ("KB", 1u64 << 10),
        ("E", 1u64 << 60),
        ("P", 1u64 << 50),
        ("T", 1u64 << 40),
        ("G", 1u64 << 30),
        ("M", 1u64 << 20),
        ("K", 1u64 << 10),
        ("B", 1),
    ];

    for (suffix, multiplier) in UNITS {
        if let Some(number) = upper.strip_suffix(suffix) {
            let number = number.trim();
            if number.is_empty() {
                continue;
            }
            let value: f64 = number.parse().ok()?;
            if value < 0.0 {
                return None;
            }
            return Some((value * *multiplier as f64) as u64);
        }
    }

    upper.parse().ok()
}

/// Parse the `TIME_LIMIT` grammar `Ay Bd Ch Dm Es` (years, days, hours,
/// minutes, seconds; any subset, any order, space separated; spec §6).
pub fn parse_time_limit(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_seconds: u64 = 0;
    for token in s.split_whitespace() {
        let (number, unit) = token.split_at(
            token
                .find(|c: char| !c.is_ascii_digit() && c != '.')
                .unwrap_or(token.len()),
        );
        if number.is_empty() || unit.is_empty() {
            return None;
        }
        let value: f64 = number.parse().ok()?;
        let seconds_per_unit: f64 = match unit.to_ascii_lowercase().as_str() {
            "y" => 365.0 * 24.0 * 3600.0,
            "d" => 24.0 * 3600.0,
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            _ => return None,
        };
        total_seconds += (value * seconds_per_unit) as u64;
    }

    Some(Duration::from_secs(total_seconds))
}

/// Job configuration (spec §6 Configuration table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    /// `IN_FILTER` — a stream is only a candidate if its path matches one of
    /// these (empty means "no restriction").
    pub include_patterns: Vec<PathPattern>,
    /// `EX_FILTER` — a stream is excluded if its path matches any of these.
    pub exclude_patterns: Vec<PathPattern>,
    /// `FRAGMENT_SIZE_THRESHOLD` — ignore fragments at or above this size,
    /// in bytes.
    pub fragment_size_threshold: Option<u64>,
    /// `FILE_SIZE_THRESHOLD` — exclude files larger than this, in bytes.
    pub file_size_threshold: Option<u64>,
    /// `OPTIMIZER_FILE_SIZE_THRESHOLD` — per-QUICK_OPTIMIZE ceiling.
    /// Default 20 MiB (spec §4.3).
    pub optimizer_file_size_threshold: u64,
    /// `FRAGMENTS_THRESHOLD` — exclude files with fewer than this many
    /// fragments.
    pub fragments_threshold: Option<u32>,
    pub sort_key: SortKey,
    pub sort_order: SortOrder,
    /// `FRAGMENTATION_THRESHOLD` — cancel the job (except MFT_OPTIMIZE) if
    /// volume fragmentation percentage is below this.
    pub fragmentation_threshold: Option<f64>,
    /// `TIME_LIMIT` — wall-clock budget for the whole job.
    pub time_limit: Option<Duration>,
    /// `REFRESH_INTERVAL` — progress delivery period. Default 100ms.
    pub refresh_interval: Duration,
    /// `DRY_RUN` — skip the host move primitive; model updates (and
    /// reported moves) still happen so the planner/mover logic can be
    /// exercised without touching the disk.
    pub dry_run: bool,
    /// `UD_JOB_REPEAT` (original `udefrag.h` flag, carried over per
    /// SPEC_FULL.md): keep repeating full OPTIMIZE passes until a pass
    /// moves nothing, rather than stopping after the configured
    /// `repeat_threshold` is first satisfied once.
    pub repeat_until_dry: bool,
    /// Minimum number of moves a pass must make to continue (spec §4.3
    /// Termination). Default 1.
    pub repeat_threshold: u64,
    /// Re-read the stream's runlist via `extent_query` after each move and
    /// compare against the model's idea of the new layout, treating a
    /// mismatch as `MODEL_CORRUPTED` (SPEC_FULL.md Open Question
    /// resolution for host primitive atomicity). Default off, matching the
    /// original's behavior of trusting the host blindly.
    pub verify_moves: bool,
    /// Number of cells in the exported cluster-state map (spec §3/§6).
    pub cluster_map_cells: usize,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            fragment_size_threshold: None,
            file_size_threshold: None,
            optimizer_file_size_threshold: 20 * (1u64 << 20),
            fragments_threshold: None,
            sort_key: SortKey::Path,
            sort_order: SortOrder::Ascending,
            fragmentation_threshold: None,
            time_limit: None,
            refresh_interval: Duration::from_millis(100),
            dry_run: false,
            repeat_until_dry: false,
            repeat_threshold: 1,
            verify_moves: false,
            cluster_map_cells: 2560,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_suffixes() {
        assert_eq!(parse_byte_size("1024"), Some(1024));
        assert_eq!(parse_byte_size("1KB"), Some(1024));
        assert_eq!(parse_byte_size("1 MB"), Some(1 << 20));
        assert_eq!(parse_byte_size("2GB"), Some(2 * (1u64 << 30)));
        assert_eq!(parse_byte_size("1.5MB"), Some((1.5 * (1u64 << 20) as f64) as u64));
        assert_eq!(parse_byte_size(""), None);
    }

    #[test]
    fn time_limit_grammar() {
        assert_eq!(parse_time_limit("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(
            parse_time_limit("1h 30m"),
            Some(Duration::from_secs(3600 + 1800))
        );
        assert_eq!(
            parse_time_limit("1d 2h 3m 4s"),
            Some(Duration::from_secs(24 * 3600 + 2 * 3600 + 3 * 60 + 4))
        );
        assert_eq!(parse_time_limit("bogus"), None);
    }

    #[test]
    fn wildcard_patterns() {
        let p = PathPattern("C:\\Windows\\*.dll".to_string());
        assert!(p.matches("C:\\Windows\\kernel32.dll"));
        assert!(!p.matches("C:\\Users\\kernel32.dll"));

        let q = PathPattern("C:\\Temp\\?.tmp".to_string());
        assert!(q.matches("C:\\Temp\\a.tmp"));
        assert!(!q.matches("C:\\Temp\\ab.tmp"));
    }

    #[test]
    fn pattern_list_splits_on_semicolon() {
        let patterns = parse_pattern_list("*.tmp; *.log ;;C:\\pagefile.sys");
        assert_eq!(patterns.len(), 3);
        assert_eq!(patterns[0].0, "*.tmp");
        assert_eq!(patterns[2].0, "C:\\pagefile.sys");
    }

    #[test]
    fn default_optimizer_threshold_is_20_mib() {
        assert_eq!(
            JobOptions::default().optimizer_file_size_threshold,
            20 * (1u64 << 20)
        );
    }
}
