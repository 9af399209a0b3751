//! The planner (spec §4.3): decides which streams to move and where.
//!
//! Candidate selection and target selection are kept as pure functions over
//! a `&VolumeModel` rather than a stateful planner object — each candidate
//! is planned and moved in sequence by [`crate::job`], so the planner only
//! ever needs to see the model as it stands right now. This also reproduces
//! spec §8's worked optimize example exactly: because the free list the
//! planner reads is the same one the mover updates after every committed
//! move, "reserved in a scratch copy" falls out for free from strict
//! sequential processing instead of needing a separate reservation pass.
use crate::config::{JobOptions, SortKey, SortOrder};
use crate::model::entities::{Extent, StreamId};
use crate::model::VolumeModel;
use crate::types::{ClusterCount, Lcn};

/// Which pass is being planned (spec §4.3 job types).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    Analyze,
    Defragment,
    Optimize { quick: bool },
    MftOptimize,
}

/// One planned relocation: move `count` clusters of `stream_id` starting at
/// `source_vcn` to `dest_lcn` (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub struct MoveRequest {
    pub stream_id: StreamId,
    pub source_vcn: crate::types::Vcn,
    pub dest_lcn: Lcn,
    pub count: ClusterCount,
}

/// Group a stream's non-sparse extents into maximal physically-contiguous
/// fragments and return each fragment's total length, in clusters. Used to
/// apply `FRAGMENT_SIZE_THRESHOLD` (spec §6): a fragment at or above the
/// threshold is considered already well-placed and not worth chasing.
fn physical_fragment_lengths(extents: &[Extent]) -> Vec<u64> {
    let mut lengths = Vec::new();
    let mut prev: Option<Extent> = None;
    for e in extents {
        if e.is_sparse() {
            continue;
        }
        match prev {
            Some(p) if p.lcn.0 + p.length.0 == e.lcn.0 => {
                *lengths.last_mut().unwrap() += e.length.0;
            }
            _ => lengths.push(e.length.0),
        }
        prev = Some(*e);
    }
    lengths
}

/// Whether `stream_id` still has fragmentation worth planning a move for:
/// fragmented, and (if `fragment_size_threshold` is set) at least one
/// physical fragment smaller than the threshold.
fn needs_defragmenting(model: &VolumeModel, stream_id: StreamId, options: &JobOptions) -> bool {
    let stream = model.stream(stream_id);
    if !stream.is_fragmented() {
        return false;
    }
    if let Some(threshold) = options.fragment_size_threshold {
        let threshold_clusters = threshold / model.bytes_per_cluster.max(1) as u64;
        let lengths = physical_fragment_lengths(&stream.extents);
        if lengths.iter().all(|&len| len >= threshold_clusters.max(1)) {
            return false;
        }
    }
    true
}

/// Candidate streams for DEFRAGMENT (spec §4.3): movable, per
/// [`VolumeModel::is_movable`], and still fragmented enough to bother with.
/// Order is insertion order (ascending `StreamId`) — DEFRAGMENT has no
/// placement-order requirement, unlike OPTIMIZE.
pub fn candidates_for_defragment(model: &VolumeModel, options: &JobOptions) -> Vec<StreamId> {
    (0..model.streams.len() as u32)
        .map(StreamId)
        .filter(|&id| model.is_movable(id, options) && needs_defragmenting(model, id, options))
        .collect()
}

/// Candidate streams for MFT_OPTIMIZE (spec §4.3): only `$MFT` and
/// `$MFTMirr`'s streams, bypassing the system-file movability filter (those
/// two files are system files by definition and would otherwise never
/// qualify under [`VolumeModel::is_movable`]).
pub fn candidates_for_mft_optimize(model: &VolumeModel) -> Vec<StreamId> {
    (0..model.streams.len() as u32)
        .map(StreamId)
        .filter(|&id| {
            let stream = model.stream(id);
            matches!(
                stream.mft_index,
                crate::types::MftIndex::MFT | crate::types::MftIndex::MFT_MIRROR
            ) && stream.is_fragmented()
        })
        .collect()
}

/// Candidate streams for OPTIMIZE, sorted by `JobOptions::sort_key`/
/// `sort_order` (spec §4.3 "Target selection (optimization)"). `quick`
/// additionally excludes streams over `optimizer_file_size_threshold`.
pub fn candidates_for_optimize(model: &VolumeModel, options: &JobOptions, quick: bool) -> Vec<StreamId> {
    let mut candidates: Vec<StreamId> = (0..model.streams.len() as u32)
        .map(StreamId)
        .filter(|&id| model.is_movable(id, options))
        .filter(|&id| {
            if !quick {
                return true;
            }
            let size = model.stream(id).cluster_count().0 * model.bytes_per_cluster as u64;
            size <= options.optimizer_file_size_threshold
        })
        .collect();

    candidates.sort_by(|&a, &b| {
        let ord = compare_by_key(model, a, b, options.sort_key);
        match options.sort_order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    });
    candidates
}

fn compare_by_key(model: &VolumeModel, a: StreamId, b: StreamId, key: SortKey) -> std::cmp::Ordering {
    let fa = model.file(model.stream(a).owner);
    let fb = model.file(model.stream(b).owner);
    match key {
        SortKey::Path => fa.path.cmp(&fb.path),
        SortKey::Size => model.stream(a).cluster_count().0.cmp(&model.stream(b).cluster_count().0),
        SortKey::CreationTime => fa.created.cmp(&fb.created),
        SortKey::ModificationTime => fa.modified.cmp(&fb.modified),
        SortKey::AccessTime => fa.accessed.cmp(&fb.accessed),
    }
}

/// First-fit target for DEFRAGMENT/MFT_OPTIMIZE (spec §4.3): the leftmost
/// free region large enough to hold the whole stream, no MFT-zone
/// exclusion. Returns `None` if the stream is empty or no region fits.
pub fn select_target_defragment(model: &VolumeModel, stream_id: StreamId) -> Option<Lcn> {
    let k = model.stream(stream_id).cluster_count();
    if k.is_zero() {
        return None;
    }
    model.free_list.first_fit(k).map(|r| r.lcn)
}

/// First-fit target for OPTIMIZE (spec §4.3): the leftmost free region large
/// enough, skipping any region that would shrink the MFT zone (unless that
/// is the only region large enough, in which case the stream is skipped for
/// this pass rather than encroaching on the zone), and constrained to lie
/// entirely to the left of the stream's current leftmost physical cluster.
///
/// That leftward bound is what makes compaction a fixed point rather than
/// an oscillation: a stream that already sits at the frontmost free region
/// it can reach returns `None` here forever after, instead of being
/// reassigned to whatever hole its own earlier move vacated further right
/// on the next pass (spec §8 "a pass that moves no files must be a fixed
/// point").
pub fn select_target_optimize(model: &VolumeModel, stream_id: StreamId) -> Option<Lcn> {
    let stream = model.stream(stream_id);
    let k = stream.cluster_count();
    if k.is_zero() {
        return None;
    }
    let current_start = stream.extents.iter().filter(|e| !e.is_sparse()).map(|e| e.lcn.0).min()?;
    model
        .free_list
        .first_fit_before_excluding(k, Lcn(current_start), model.mft_zone)
        .map(|r| r.lcn)
}

/// Whether `stream_id` is already sitting exactly at `target`: a single
/// non-sparse extent starting at `target` with the stream's full cluster
/// count (spec §4.3 "If the stream is already at its target position it is
/// skipped").
pub fn already_at_target(model: &VolumeModel, stream_id: StreamId, target: Lcn) -> bool {
    let stream = model.stream(stream_id);
    let live: Vec<&Extent> = stream.extents.iter().filter(|e| !e.is_sparse()).collect();
    matches!(live.as_slice(), [only] if only.lcn == target && only.length == stream.cluster_count())
}

/// Expand a chosen `dest_start` into one [`MoveRequest`] per non-sparse
/// extent of `stream_id`, preserving each extent's offset from the start of
/// the stream's live data (spec §4.4: relocation is expressed per-extent,
/// but because VCN ranges are contiguous across a stream's extent list,
/// relocating every extent to `dest_start + (vcn - first_vcn)` yields one
/// contiguous destination run once every move in the list commits).
pub fn build_move_requests(model: &VolumeModel, stream_id: StreamId, dest_start: Lcn) -> Vec<MoveRequest> {
    let stream = model.stream(stream_id);
    let Some(first_vcn) = stream.extents.iter().find(|e| !e.is_sparse()).map(|e| e.vcn) else {
        return Vec::new();
    };
    stream
        .extents
        .iter()
        .filter(|e| !e.is_sparse())
        .map(|e| MoveRequest {
            stream_id,
            source_vcn: e.vcn,
            dest_lcn: Lcn(dest_start.0 + (e.vcn.0 - first_vcn.0)),
            count: e.length,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entities::{FileEntry, FileFlags, Stream};
    use crate::model::free_list::{FreeList, FreeRegion};
    use crate::types::{MftIndex, Vcn};
    use compact_str::CompactString;

    fn model_with_file(total_clusters: u64, extents: Vec<Extent>) -> (VolumeModel, StreamId) {
        let mut model = VolumeModel::new(4096, 512, total_clusters);
        let file_id = model.add_file(FileEntry {
            mft_index: MftIndex(20),
            parent_index: MftIndex::ROOT,
            flags: FileFlags::empty(),
            name: CompactString::new("a.txt"),
            path: Some(CompactString::new("C:\\a.txt")),
            streams: Vec::new(),
            created: 0,
            modified: 0,
            accessed: 0,
        });
        let mut stream = Stream::new(file_id, MftIndex(20), CompactString::new(""));
        stream.extents = extents;
        let stream_id = model.add_stream(stream);
        (model, stream_id)
    }

    #[test]
    fn defragment_candidates_skip_unfragmented_streams() {
        let (model, _) = model_with_file(
            100,
            vec![Extent { vcn: Vcn(0), lcn: Lcn(10), length: ClusterCount(5) }],
        );
        let options = JobOptions::default();
        assert!(candidates_for_defragment(&model, &options).is_empty());
    }

    #[test]
    fn defragment_candidates_include_fragmented_streams() {
        let (model, stream_id) = model_with_file(
            100,
            vec![
                Extent { vcn: Vcn(0), lcn: Lcn(10), length: ClusterCount(5) },
                Extent { vcn: Vcn(5), lcn: Lcn(30), length: ClusterCount(5) },
            ],
        );
        let options = JobOptions::default();
        assert_eq!(candidates_for_defragment(&model, &options), vec![stream_id]);
    }

    #[test]
    fn fragment_size_threshold_excludes_already_large_fragments() {
        let (model, _) = model_with_file(
            1000,
            vec![
                Extent { vcn: Vcn(0), lcn: Lcn(10), length: ClusterCount(100) },
                Extent { vcn: Vcn(100), lcn: Lcn(300), length: ClusterCount(100) },
            ],
        );
        let mut options = JobOptions::default();
        // Each fragment is 100 clusters * 4096 bytes = 409600 bytes; set the
        // threshold below that so both fragments count as "large enough".
        options.fragment_size_threshold = Some(100 * 4096);
        assert!(candidates_for_defragment(&model, &options).is_empty());
    }

    #[test]
    fn select_target_defragment_is_first_fit() {
        let (mut model, stream_id) = model_with_file(
            200,
            vec![
                Extent { vcn: Vcn(0), lcn: Lcn(10), length: ClusterCount(5) },
                Extent { vcn: Vcn(5), lcn: Lcn(30), length: ClusterCount(5) },
            ],
        );
        model.free_list = FreeList::from_regions(vec![
            FreeRegion { lcn: Lcn(0), length: ClusterCount(3) },
            FreeRegion { lcn: Lcn(100), length: ClusterCount(20) },
        ]);
        assert_eq!(select_target_defragment(&model, stream_id), Some(Lcn(100)));
    }

    #[test]
    fn select_target_optimize_skips_mft_zone() {
        let (mut model, stream_id) = model_with_file(
            200,
            vec![Extent { vcn: Vcn(0), lcn: Lcn(50), length: ClusterCount(10) }],
        );
        model.free_list = FreeList::from_regions(vec![FreeRegion { lcn: Lcn(0), length: ClusterCount(20) }]);
        model.mft_zone = Some((Lcn(0), ClusterCount(20)));
        assert_eq!(select_target_optimize(&model, stream_id), None);
    }

    #[test]
    fn already_at_target_detects_no_op_move() {
        let (model, stream_id) = model_with_file(
            200,
            vec![Extent { vcn: Vcn(0), lcn: Lcn(10), length: ClusterCount(5) }],
        );
        assert!(already_at_target(&model, stream_id, Lcn(10)));
        assert!(!already_at_target(&model, stream_id, Lcn(20)));
    }

    #[test]
    fn build_move_requests_preserves_relative_vcn_offsets() {
        let (model, stream_id) = model_with_file(
            200,
            vec![
                Extent { vcn: Vcn(0), lcn: Lcn(10), length: ClusterCount(5) },
                Extent { vcn: Vcn(5), lcn: Lcn(30), length: ClusterCount(5) },
            ],
        );
        let requests = build_move_requests(&model, stream_id, Lcn(100));
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].dest_lcn, Lcn(100));
        assert_eq!(requests[1].dest_lcn, Lcn(105));
    }

    #[test]
    fn optimize_candidates_sort_by_path_and_place_sequentially() {
        // Mirrors the spec §8 worked optimize example: three movable files,
        // sorted by path ascending, placed back-to-back from the leftmost
        // free region.
        let mut model = VolumeModel::new(4096, 512, 200);
        model.free_list = FreeList::from_regions(vec![FreeRegion { lcn: Lcn(10), length: ClusterCount(50) }]);
        let mut ids = Vec::new();
        for (name, len) in [("a", 20u64), ("b", 10), ("c", 15)] {
            let file_id = model.add_file(FileEntry {
                mft_index: MftIndex(20 + ids.len() as u64),
                parent_index: MftIndex::ROOT,
                flags: FileFlags::empty(),
                name: CompactString::new(name),
                path: Some(CompactString::new(format!("C:\\{name}"))),
                streams: Vec::new(),
                created: 0,
                modified: 0,
                accessed: 0,
            });
            let mut stream = Stream::new(file_id, MftIndex(20), CompactString::new(""));
            stream.extents.push(Extent { vcn: Vcn(0), lcn: Lcn(500 + ids.len() as u64 * 100), length: ClusterCount(len) });
            ids.push(model.add_stream(stream));
        }

        let options = JobOptions::default();
        let candidates = candidates_for_optimize(&model, &options, false);
        assert_eq!(candidates, ids);

        let mut expected_starts = Vec::new();
        for &id in &candidates {
            let target = select_target_optimize(&model, id).unwrap();
            expected_starts.push(target);
            let requests = build_move_requests(&model, id, target);
            let count: u64 = requests.iter().map(|r| r.count.0).sum();
            model.free_list.sub(target, ClusterCount(count));
        }
        assert_eq!(expected_starts, vec![Lcn(10), Lcn(30), Lcn(40)]);
    }
}
