//! Job orchestration (spec §2 pipeline, §5 concurrency model): wires the
//! scanner, volume model, planner and mover into the control-thread loop one
//! `run_job` call drives from start to finish.
//!
//! The control thread is whichever thread calls [`run_job`] — this module
//! never spawns its own. Progress and cancellation flow through the
//! [`crate::host::ProgressSink`] the caller supplies, matching spec §5:
//! "a single control thread mutates the model; a second thread may only
//! read snapshots and set the cancellation flag."
use crate::config::JobOptions;
use crate::error::{CoreError, Result};
use crate::host::{ExtentQuery, Host, ProgressSink};
use crate::model::entities::{FileFlags, StreamFlags};
use crate::model::progress::{ClusterMap, Operation, ProgressRecord};
use crate::model::VolumeModel;
use crate::mover::{apply_move, MoveOutcome};
use crate::planner::{self, JobType};
use crate::scanner::{mft, walker, AcceptAll, FileSet, ScanOptions};
use crate::types::{ClusterCount, Lcn, MftIndex};
use std::path::Path;
use std::time::Instant;

/// Pre-flight facts about the target volume (spec §7 category 1
/// "environment errors"; SPEC_FULL.md's supplemented volume-validation
/// decision tree, grounded on `udefrag_validate_volume`). The caller is
/// expected to have gathered these from `volume_info`/drive enumeration
/// before calling [`run_job`] — classifying removable/remote/CD-ROM media
/// is a platform concern the core does not perform itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeValidation {
    pub is_ntfs: bool,
    pub is_removable: bool,
    pub is_cdrom: bool,
    pub is_remote: bool,
    pub is_assigned_by_subst: bool,
    pub is_udf: bool,
    pub is_dirty: bool,
    pub bytes_per_cluster: u32,
    pub is_windows_2000: bool,
}

/// Reject the job outright per spec §7 category 1, in the fixed order the
/// original's own volume-validation routine checks them.
pub fn validate_volume(v: &VolumeValidation, job_type: JobType) -> Result<()> {
    if v.is_cdrom {
        return Err(CoreError::Cdrom);
    }
    if v.is_remote {
        return Err(CoreError::Remote);
    }
    if v.is_assigned_by_subst {
        return Err(CoreError::AssignedBySubst);
    }
    if v.is_removable {
        return Err(CoreError::Removable);
    }
    if v.is_udf {
        return Err(CoreError::UdfDefrag);
    }
    if !v.is_ntfs {
        return Err(CoreError::FatOptimization);
    }
    if v.is_dirty {
        return Err(CoreError::DirtyVolume);
    }
    if matches!(job_type, JobType::MftOptimize) && v.is_windows_2000 && v.bytes_per_cluster == 4096 {
        return Err(CoreError::W2k4kbClusters);
    }
    Ok(())
}

/// The outcome of one [`run_job`]/[`run_job_walker`] call: a final
/// [`ProgressRecord`] snapshot, plus the fatal error if the job aborted
/// (spec §6 "On failure the job returns its integer error code and a
/// populated progress record").
#[derive(Debug)]
pub struct JobHandle {
    pub progress: ProgressRecord,
    pub error: Option<CoreError>,
}

impl JobHandle {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// `0` running (never observed here — `run_job` only returns once a job
    /// has stopped), `>0` done, `<0` failed with this code (spec §6).
    pub fn completion_status(&self) -> i32 {
        self.progress.completion_status
    }

    fn failed(job_type: JobType, options: &JobOptions, error: CoreError) -> Self {
        let code = error.code().as_i32();
        let map = ClusterMap::new(1, options.cluster_map_cells.max(1), 0);
        let mut progress = ProgressRecord::new(operation_for(job_type), map);
        progress.completion_status = code.min(-1);
        JobHandle { progress, error: Some(error) }
    }

    fn cancelled(job_type: JobType, options: &JobOptions) -> Self {
        let map = ClusterMap::new(1, options.cluster_map_cells.max(1), 0);
        let mut progress = ProgressRecord::new(operation_for(job_type), map);
        progress.completion_status = 2;
        JobHandle { progress, error: None }
    }
}

fn operation_for(job_type: JobType) -> Operation {
    match job_type {
        JobType::Analyze => Operation::Analyze,
        JobType::Defragment => Operation::Defrag,
        JobType::Optimize { .. } | JobType::MftOptimize => Operation::Optimize,
    }
}

/// Run one job against an NTFS volume (spec §4.1 scan + §4.2/§4.3/§4.4
/// plan-and-move pipeline). Pre-flight validation happens first; the MFT is
/// then scanned, the bitmap loaded, the MFT zone refined, and the
/// appropriate pass loop run for `job_type`.
pub fn run_job(
    host: &dyn Host,
    sink: &dyn ProgressSink,
    validation: VolumeValidation,
    job_type: JobType,
    options: &JobOptions,
    drive_root: &str,
    scan_options: ScanOptions,
) -> JobHandle {
    if let Err(e) = validate_volume(&validation, job_type) {
        return JobHandle::failed(job_type, options, e);
    }

    let scan_result = mft::scan(host, &AcceptAll, sink, scan_options, drive_root);
    finish(scan_result, host, sink, job_type, options)
}

/// Run one job against the non-NTFS walker fallback (spec §4.5). No
/// volume-validation decision tree applies here — the walker is itself the
/// fallback for filesystems `validate_volume` would otherwise reject.
pub fn run_job_walker(
    root: &Path,
    host: &dyn Host,
    extent_query: &dyn ExtentQuery,
    sink: &dyn ProgressSink,
    job_type: JobType,
    options: &JobOptions,
    scan_options: ScanOptions,
) -> JobHandle {
    let scan_result = walker::scan(root, host, extent_query, &AcceptAll, sink, scan_options);
    finish(scan_result, host, sink, job_type, options)
}

/// Run the plan-and-move pipeline directly against an already-scanned,
/// already-bitmap-loaded model. Exposed for callers (and tests) that build
/// a [`VolumeModel`] themselves rather than through a scan.
pub fn run_job_from_model(
    model: VolumeModel,
    host: &dyn Host,
    sink: &dyn ProgressSink,
    job_type: JobType,
    options: &JobOptions,
) -> JobHandle {
    run_pipeline(model, host, sink, job_type, options)
}

fn finish(
    scan_result: Result<FileSet>,
    host: &dyn Host,
    sink: &dyn ProgressSink,
    job_type: JobType,
    options: &JobOptions,
) -> JobHandle {
    let FileSet { mut model, error_count } = match scan_result {
        Ok(fs) => fs,
        Err(CoreError::Cancelled) => return JobHandle::cancelled(job_type, options),
        Err(e) => return JobHandle::failed(job_type, options, e),
    };
    if error_count > 0 {
        tracing::warn!(error_count, "scan completed with unreadable records/files");
    }

    if let Err(e) = model.load_bitmap(host) {
        return JobHandle::failed(job_type, options, e);
    }
    refine_mft_zone(&mut model);

    run_pipeline(model, host, sink, job_type, options)
}

/// Populate [`VolumeModel::mft_zone`] from the free space immediately
/// following `$MFT`'s last extent (SPEC_FULL.md Open Question resolution).
/// The scanner leaves a zero-length placeholder at the boot sector's
/// `$MFT` start LCN; this replaces it with the real adjoining free region,
/// if any.
fn refine_mft_zone(model: &mut VolumeModel) {
    let Some(mft_file) = model.file_by_mft_index(MftIndex::MFT) else {
        return;
    };
    let mft_stream_id = model
        .file(mft_file)
        .streams
        .iter()
        .copied()
        .find(|&sid| model.stream(sid).name.is_empty());
    let Some(stream_id) = mft_stream_id else {
        return;
    };
    let Some(last) = model
        .stream(stream_id)
        .extents
        .iter()
        .filter(|e| !e.is_sparse())
        .max_by_key(|e| e.vcn.0)
        .copied()
    else {
        return;
    };

    let zone_start = Lcn(last.lcn.0 + last.length.0);
    model.mft_zone = match model.free_list.iter().find(|r| r.lcn == zone_start) {
        Some(region) => Some((region.lcn, region.length)),
        None => Some((zone_start, ClusterCount::ZERO)),
    };
}

fn fragmentation_percentage(model: &VolumeModel) -> f64 {
    let total = model.files.iter().filter(|f| !f.is_directory()).count();
    if total == 0 {
        return 0.0;
    }
    let fragmented = model.streams.iter().filter(|s| s.is_fragmented()).count();
    fragmented as f64 / total as f64 * 100.0
}

fn mft_size_bytes(model: &VolumeModel) -> u64 {
    let Some(mft_file) = model.file_by_mft_index(MftIndex::MFT) else {
        return 0;
    };
    let clusters: u64 = model
        .file(mft_file)
        .streams
        .iter()
        .filter(|&&sid| model.stream(sid).name.is_empty())
        .map(|&sid| model.stream(sid).cluster_count().0)
        .sum();
    clusters * model.bytes_per_cluster as u64
}

fn candidates_total_clusters(model: &VolumeModel, job_type: JobType, options: &JobOptions) -> u64 {
    let ids = build_candidates(model, options, job_type);
    ids.iter().map(|&id| model.stream(id).cluster_count().0).sum()
}

fn build_candidates(model: &VolumeModel, options: &JobOptions, job_type: JobType) -> Vec<crate::model::entities::StreamId> {
    match job_type {
        JobType::Analyze => Vec::new(),
        JobType::Defragment => planner::candidates_for_defragment(model, options),
        JobType::Optimize { quick } => planner::candidates_for_optimize(model, options, quick),
        JobType::MftOptimize => planner::candidates_for_mft_optimize(model),
    }
}

fn initial_progress(model: &VolumeModel, job_type: JobType, options: &JobOptions) -> ProgressRecord {
    let map = model.cluster_map(options.cluster_map_cells.max(1));
    let mut progress = ProgressRecord::new(operation_for(job_type), map);

    let mut files = 0u32;
    let mut directories = 0u32;
    let mut compressed = 0u32;
    for file in &model.files {
        if file.is_directory() {
            directories += 1;
        } else {
            files += 1;
        }
        if file.flags.contains(FileFlags::COMPRESSED) {
            compressed += 1;
        }
    }

    let mut fragmented = 0u32;
    let mut fragments = 0u64;
    for stream in &model.streams {
        let count = stream.fragment_count();
        fragments += count as u64;
        if count >= 2 {
            fragmented += 1;
        }
    }

    progress.files = files;
    progress.directories = directories;
    progress.compressed = compressed;
    progress.fragmented = fragmented;
    progress.fragments = fragments;
    progress.total_space = model.total_clusters * model.bytes_per_cluster as u64;
    progress.free_space = model.free_list.total_free() * model.bytes_per_cluster as u64;
    progress.mft_size = mft_size_bytes(model);
    progress.clusters_to_process = candidates_total_clusters(model, job_type, options);
    progress
}

/// Which kind of move pass is running — OPTIMIZE runs compaction followed by
/// a defragmentation mop-up pass (spec §4.3: "Optimize first relocates files
/// to their sorted target positions, then defragments whatever remains
/// fragmented").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Defragment,
    Compact { quick: bool },
    MftOptimize,
}

fn deadline_reached(options: &JobOptions, host: &dyn Host, start: Instant) -> bool {
    match options.time_limit {
        Some(limit) => host.now().duration_since(start) >= limit,
        None => false,
    }
}

fn run_pipeline(
    mut model: VolumeModel,
    host: &dyn Host,
    sink: &dyn ProgressSink,
    job_type: JobType,
    options: &JobOptions,
) -> JobHandle {
    let start_time = host.now();
    let mut progress = initial_progress(&model, job_type, options);
    sink.on_progress(&progress);

    if matches!(job_type, JobType::Analyze) {
        progress.completion_status = 1;
        progress.percentage = 100.0;
        return JobHandle { progress, error: None };
    }

    if !matches!(job_type, JobType::MftOptimize) {
        if let Some(threshold) = options.fragmentation_threshold {
            if fragmentation_percentage(&model) < threshold {
                progress.completion_status = 1;
                progress.percentage = 100.0;
                sink.on_progress(&progress);
                return JobHandle { progress, error: None };
            }
        }
    }

    let cancelled = match job_type {
        JobType::Analyze => false,
        JobType::Defragment => {
            match run_phase(&mut model, host, sink, options, &mut progress, start_time, Phase::Defragment) {
                Ok(c) => c,
                Err(e) => return JobHandle::failed(job_type, options, e),
            }
        }
        JobType::Optimize { quick } => {
            let compact_cancelled = match run_phase(
                &mut model,
                host,
                sink,
                options,
                &mut progress,
                start_time,
                Phase::Compact { quick },
            ) {
                Ok(c) => c,
                Err(e) => return JobHandle::failed(job_type, options, e),
            };
            if compact_cancelled {
                true
            } else {
                match run_phase(&mut model, host, sink, options, &mut progress, start_time, Phase::Defragment) {
                    Ok(c) => c,
                    Err(e) => return JobHandle::failed(job_type, options, e),
                }
            }
        }
        JobType::MftOptimize => {
            match run_phase(&mut model, host, sink, options, &mut progress, start_time, Phase::MftOptimize) {
                Ok(c) => c,
                Err(e) => return JobHandle::failed(job_type, options, e),
            }
        }
    };

    progress.completion_status = if cancelled { 2 } else { 1 };
    progress.percentage = if progress.clusters_to_process == 0 {
        100.0
    } else {
        (progress.processed_clusters as f64 / progress.clusters_to_process as f64 * 100.0).min(100.0)
    };
    sink.on_progress(&progress);
    JobHandle { progress, error: None }
}

/// One job-type's move passes (spec §4.3 "Termination"): rebuild candidates
/// each pass (so newly-freed space from earlier moves in the same pass is
/// visible), move as many as the host allows, stop when a pass makes no
/// progress or `repeat_threshold`/`repeat_until_dry` say to stop, and bail
/// out early on cancellation or `TIME_LIMIT` expiry (not an error — spec §7
/// category 6).
fn run_phase(
    model: &mut VolumeModel,
    host: &dyn Host,
    sink: &dyn ProgressSink,
    options: &JobOptions,
    progress: &mut ProgressRecord,
    start_time: Instant,
    phase: Phase,
) -> Result<bool> {
    let mut last_emit = host.now();
    loop {
        let candidates = match phase {
            Phase::Defragment => planner::candidates_for_defragment(model, options),
            Phase::Compact { quick } => planner::candidates_for_optimize(model, options, quick),
            Phase::MftOptimize => planner::candidates_for_mft_optimize(model),
        };
        if candidates.is_empty() {
            return Ok(false);
        }

        let mut moves_this_pass: u64 = 0;
        let mut cancelled = false;

        for stream_id in candidates {
            if sink.should_cancel() || deadline_reached(options, host, start_time) {
                cancelled = true;
                break;
            }

            let target = match phase {
                Phase::Defragment | Phase::MftOptimize => planner::select_target_defragment(model, stream_id),
                Phase::Compact { .. } => planner::select_target_optimize(model, stream_id),
            };
            let Some(target) = target else {
                continue;
            };
            if planner::already_at_target(model, stream_id, target) {
                continue;
            }

            let requests = planner::build_move_requests(model, stream_id, target);
            for request in &requests {
                if sink.should_cancel() || deadline_reached(options, host, start_time) {
                    cancelled = true;
                    break;
                }
                match apply_move(model, host, request, options.dry_run, options.verify_moves)? {
                    MoveOutcome::Committed => {
                        progress.moved_clusters += request.count.0;
                        progress.processed_clusters += request.count.0;
                        progress.total_moves += 1;
                        moves_this_pass += 1;
                    }
                    MoveOutcome::Skipped { .. } => {}
                }

                if host.now().duration_since(last_emit) >= options.refresh_interval {
                    sink.on_progress(progress);
                    last_emit = host.now();
                }
            }

            let fragmented = model.stream(stream_id).is_fragmented();
            model.stream_mut(stream_id).flags.set(StreamFlags::FRAGMENTED, fragmented);

            if cancelled {
                break;
            }
        }

        progress.pass_number += 1;
        sink.on_progress(progress);
        last_emit = host.now();

        if cancelled {
            return Ok(true);
        }
        if moves_this_pass == 0 {
            return Ok(false);
        }
        if !options.repeat_until_dry && moves_this_pass < options.repeat_threshold {
            return Ok(false);
        }
    }
}
