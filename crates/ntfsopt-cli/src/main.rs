//! ntfsopt — thin command-line front end for `ntfsopt-core`.
//!
//! All of the hard engineering (spec §1's three subsystems) lives in
//! `ntfsopt-core`. This binary only: parses arguments, gathers the
//! platform facts `run_job`'s pre-flight check needs, opens a volume
//! handle, drives one job to completion, and prints a report. Presentation
//! (the cluster map, progress bars, a GUI) is out of scope per spec §1 —
//! this prints the bit-exact progress record and cluster map as plain text
//! (or, with `--json`, as JSON), nothing more.
mod platform;
mod report;

#[cfg(not(windows))]
use anyhow::bail;
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use ntfsopt_core::config::{
    parse_byte_size, parse_pattern_list, parse_time_limit, JobOptions, SortKey, SortOrder,
};
use ntfsopt_core::host::ProgressSink;
use ntfsopt_core::job;
use ntfsopt_core::model::ProgressRecord;
use ntfsopt_core::planner::JobType;
use ntfsopt_core::scanner::ScanOptions;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "ntfsopt", version, about = "NTFS defragmentation and optimization engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the volume and report fragmentation statistics; no moves.
    Analyze(VolumeArgs),
    /// Relocate fragmented movable files to single contiguous regions.
    Defrag(VolumeArgs),
    /// Compact movable files toward the front of the volume, then defragment the rest.
    Optimize(VolumeArgs),
    /// Like `optimize`, but skips files larger than `--optimizer-file-size-threshold`.
    QuickOptimize(VolumeArgs),
    /// Defragment only `$MFT` and `$MFTMirr`.
    MftOptimize(VolumeArgs),
}

#[derive(clap::Args)]
struct VolumeArgs {
    /// Drive letter to operate on, e.g. `C`.
    drive: char,

    /// `IN_FILTER` — `;`-separated include path patterns (`?`/`*` wildcards).
    #[arg(long)]
    in_filter: Option<String>,
    /// `EX_FILTER` — `;`-separated exclude path patterns.
    #[arg(long)]
    ex_filter: Option<String>,
    /// `FRAGMENT_SIZE_THRESHOLD` — ignore fragments at or above this size (accepts `KB`/`MB`/... suffixes).
    #[arg(long)]
    fragment_size_threshold: Option<String>,
    /// `FILE_SIZE_THRESHOLD` — exclude files larger than this.
    #[arg(long)]
    file_size_threshold: Option<String>,
    /// `OPTIMIZER_FILE_SIZE_THRESHOLD` — per-QUICK_OPTIMIZE ceiling; default 20 MiB.
    #[arg(long)]
    optimizer_file_size_threshold: Option<String>,
    /// `FRAGMENTS_THRESHOLD` — exclude files with fewer than this many fragments.
    #[arg(long)]
    fragments_threshold: Option<u32>,
    /// `SORTING` — optimize placement key.
    #[arg(long, value_enum, default_value = "path")]
    sorting: Sorting,
    /// `SORTING_ORDER`.
    #[arg(long, value_enum, default_value = "asc")]
    sorting_order: Order,
    /// `FRAGMENTATION_THRESHOLD` — cancel if volume fragmentation % is below this (ignored by `mft-optimize`).
    #[arg(long)]
    fragmentation_threshold: Option<f64>,
    /// `TIME_LIMIT` — wall-clock budget, e.g. `1h 30m`.
    #[arg(long)]
    time_limit: Option<String>,
    /// `REFRESH_INTERVAL`, in milliseconds; default 100.
    #[arg(long)]
    refresh_interval_ms: Option<u64>,
    /// `DRY_RUN` — skip the host move primitive; model updates still happen.
    #[arg(long)]
    dry_run: bool,
    /// Keep repeating full-optimize passes until one moves nothing, rather
    /// than stopping once a pass falls below `--repeat-threshold`.
    #[arg(long)]
    repeat_until_dry: bool,
    /// Minimum moves a pass must make to continue. Default 1.
    #[arg(long, default_value_t = 1)]
    repeat_threshold: u64,
    /// Continue past corrupt MFT records instead of failing the whole scan.
    #[arg(long)]
    allow_partial_scan: bool,
    /// Re-read each moved stream's runlist after the move and fail hard on mismatch.
    #[arg(long)]
    verify_moves: bool,
    /// Print the final progress record as JSON instead of the plain-text report.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Sorting {
    Path,
    Size,
    CTime,
    MTime,
    ATime,
}

#[derive(Clone, Copy, ValueEnum)]
enum Order {
    Asc,
    Desc,
}

impl VolumeArgs {
    fn to_job_options(&self) -> Result<JobOptions> {
        let mut options = JobOptions::default();
        if let Some(s) = &self.in_filter {
            options.include_patterns = parse_pattern_list(s);
        }
        if let Some(s) = &self.ex_filter {
            options.exclude_patterns = parse_pattern_list(s);
        }
        if let Some(s) = &self.fragment_size_threshold {
            options.fragment_size_threshold =
                Some(parse_byte_size(s).ok_or_else(|| anyhow::anyhow!("bad --fragment-size-threshold: {s}"))?);
        }
        if let Some(s) = &self.file_size_threshold {
            options.file_size_threshold =
                Some(parse_byte_size(s).ok_or_else(|| anyhow::anyhow!("bad --file-size-threshold: {s}"))?);
        }
        if let Some(s) = &self.optimizer_file_size_threshold {
            options.optimizer_file_size_threshold = parse_byte_size(s)
                .ok_or_else(|| anyhow::anyhow!("bad --optimizer-file-size-threshold: {s}"))?;
        }
        options.fragments_threshold = self.fragments_threshold;
        options.sort_key = match self.sorting {
            Sorting::Path => SortKey::Path,
            Sorting::Size => SortKey::Size,
            Sorting::CTime => SortKey::CreationTime,
            Sorting::MTime => SortKey::ModificationTime,
            Sorting::ATime => SortKey::AccessTime,
        };
        options.sort_order = match self.sorting_order {
            Order::Asc => SortOrder::Ascending,
            Order::Desc => SortOrder::Descending,
        };
        options.fragmentation_threshold = self.fragmentation_threshold;
        if let Some(s) = &self.time_limit {
            options.time_limit =
                Some(parse_time_limit(s).ok_or_else(|| anyhow::anyhow!("bad --time-limit: {s}"))?);
        }
        if let Some(ms) = self.refresh_interval_ms {
            options.refresh_interval = std::time::Duration::from_millis(ms);
        }
        options.dry_run = self.dry_run;
        options.repeat_until_dry = self.repeat_until_dry;
        options.repeat_threshold = self.repeat_threshold;
        options.verify_moves = self.verify_moves;
        Ok(options)
    }
}

/// Prints each delivered [`ProgressRecord`] to stderr at most once per
/// snapshot, matching spec §5's "a progress thread ... delivers snapshots
/// to the UI on a timer" — here the control thread itself is the only
/// thread, so this just logs synchronously whenever `run_job` calls it.
struct ConsoleProgress {
    last_logged_moves: AtomicU64,
}

impl ConsoleProgress {
    fn new() -> Self {
        Self { last_logged_moves: AtomicU64::new(u64::MAX) }
    }
}

impl ProgressSink for ConsoleProgress {
    fn on_progress(&self, progress: &ProgressRecord) {
        if self.last_logged_moves.swap(progress.total_moves, Ordering::Relaxed) == progress.total_moves {
            return;
        }
        tracing::info!(
            pass = progress.pass_number,
            percent = format!("{:.1}", progress.percentage),
            moved_clusters = progress.moved_clusters,
            total_moves = progress.total_moves,
            fragmented = progress.fragmented,
            "progress"
        );
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .without_time()
        .init();

    let cli = Cli::parse();
    let (args, job_type) = match &cli.command {
        Command::Analyze(a) => (a, JobType::Analyze),
        Command::Defrag(a) => (a, JobType::Defragment),
        Command::Optimize(a) => (a, JobType::Optimize { quick: false }),
        Command::QuickOptimize(a) => (a, JobType::Optimize { quick: true }),
        Command::MftOptimize(a) => (a, JobType::MftOptimize),
    };

    let options = args.to_job_options()?;
    let scan_options = ScanOptions { allow_partial_scan: args.allow_partial_scan };

    run(args.drive, job_type, &options, scan_options, args.json)
}

#[cfg(windows)]
fn run(drive: char, job_type: JobType, options: &JobOptions, scan_options: ScanOptions, json: bool) -> Result<()> {
    use ntfsopt_core::host::windows_volume::WindowsVolume;

    let validation = platform::validate(drive)?;
    let volume = WindowsVolume::open(drive).map_err(|e| anyhow::anyhow!("{e}"))?;
    let drive_root = format!("\\\\?\\{drive}:\\");

    let sink = ConsoleProgress::new();
    let start = Instant::now();
    tracing::info!(?drive, job = ?job_kind(job_type), "starting job");

    let handle = job::run_job(&volume, &sink, validation, job_type, options, &drive_root, scan_options);

    if json {
        println!("{}", handle.progress.to_json().map_err(|e| anyhow::anyhow!("{e}"))?);
    } else {
        report::print(&handle, start.elapsed());
    }
    if handle.succeeded() {
        Ok(())
    } else {
        std::process::exit(exit_code(&handle));
    }
}

#[cfg(not(windows))]
fn run(
    _drive: char,
    _job_type: JobType,
    _options: &JobOptions,
    _scan_options: ScanOptions,
    _json: bool,
) -> Result<()> {
    bail!(
        "ntfsopt's MFT scanner and mover talk directly to a Windows NTFS volume \
         (FSCTL_GET_NTFS_VOLUME_DATA, FSCTL_MOVE_FILE, ...) and only run on Windows. \
         ntfsopt-core's mock host and walker fallback are exercised by the crate's own test suite on any platform."
    );
}

#[cfg(windows)]
fn job_kind(job_type: JobType) -> &'static str {
    match job_type {
        JobType::Analyze => "analyze",
        JobType::Defragment => "defrag",
        JobType::Optimize { quick: false } => "optimize",
        JobType::Optimize { quick: true } => "quick-optimize",
        JobType::MftOptimize => "mft-optimize",
    }
}

#[cfg(windows)]
fn exit_code(handle: &job::JobHandle) -> i32 {
    handle.error.as_ref().map(|e| e.code().as_i32().unsigned_abs() as i32).unwrap_or(1)
}
