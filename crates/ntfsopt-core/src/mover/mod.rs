//! The mover (spec §4.4): applies one [`crate::planner::MoveRequest`] to a
//! host and to the in-memory model, with rollback on failure.
use crate::error::{CoreError, Result};
use crate::host::{Host, StreamRef};
use crate::model::entities::{Extent, StreamId};
use crate::model::VolumeModel;
use crate::planner::MoveRequest;
use crate::types::{ClusterCount, Lcn, Vcn};

/// Outcome of one [`apply_move`] call. Mirrors the CANDIDATE→PENDING→
/// COMMITTED|SKIPPED state machine spec §4.4 describes, collapsed to the
/// two terminal states a single call can reach (a move is only ever
/// attempted once; retries, if any, are a new call with a new target).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Committed,
    /// The move was not applied. `reason` is diagnostic only — callers
    /// decide whether a skip is worth logging or counting.
    Skipped { reason: &'static str },
}

fn stream_ref_for(model: &VolumeModel, stream_id: StreamId) -> StreamRef {
    let stream = model.stream(stream_id);
    StreamRef {
        mft_index: stream.mft_index,
        stream_name: stream.name.to_string(),
    }
}

/// Apply one move request (spec §4.4 five-step protocol):
///
/// 1. Assert the destination region is entirely free.
/// 2. Reserve it (`free_list.sub`).
/// 3. Invoke the host's move-extent primitive (skipped under `dry_run`).
/// 4. On success, rewrite the stream's extents and free the vacated source
///    range(s); on failure, roll the reservation back.
/// 5. If `verify_moves` is set, re-read the stream's layout through the
///    host and fail hard on any mismatch (`ModelCorrupted`).
pub fn apply_move(
    model: &mut VolumeModel,
    host: &dyn Host,
    request: &MoveRequest,
    dry_run: bool,
    verify_moves: bool,
) -> Result<MoveOutcome> {
    if !model.free_list.contains(request.dest_lcn, request.count) {
        return Ok(MoveOutcome::Skipped { reason: "destination not entirely free" });
    }

    model.free_list.sub(request.dest_lcn, request.count);

    if !dry_run {
        let stream_ref = stream_ref_for(model, request.stream_id);
        if let Err(_err) = host.move_extent(&stream_ref, request.source_vcn, request.dest_lcn, request.count) {
            model.free_list.add(request.dest_lcn, request.count);
            return Ok(MoveOutcome::Skipped { reason: "host move_extent failed" });
        }
    }

    let freed = rewrite_stream_extents(
        &mut model.stream_mut(request.stream_id).extents,
        request.source_vcn,
        request.count,
        request.dest_lcn,
    );
    for (lcn, length) in freed {
        model.free_list.add(lcn, length);
    }

    if verify_moves {
        verify_stream_layout(model, host, request.stream_id)?;
    }

    Ok(MoveOutcome::Committed)
}

/// Re-read a stream's runlist through [`crate::host::ExtentQuery`] and
/// compare it against the model's own idea of the layout (SPEC_FULL.md
/// Open Question: `Config::verify_moves`). A mismatch means the host
/// primitive did something the model didn't account for — not recoverable,
/// so this is one of the invariant-violation errors spec §7 category 5
/// describes.
fn verify_stream_layout(model: &VolumeModel, host: &dyn Host, stream_id: StreamId) -> Result<()> {
    let stream_ref = stream_ref_for(model, stream_id);
    let observed = host
        .extent_query(&stream_ref)
        .map_err(|e| CoreError::HostIo(e.0))?;
    let expected: Vec<(Vcn, Lcn, ClusterCount)> = model
        .stream(stream_id)
        .extents
        .iter()
        .map(|e| (e.vcn, e.lcn, e.length))
        .collect();
    if observed != expected {
        return Err(CoreError::ModelCorrupted {
            context: format!("post-move layout mismatch on stream {:?}", stream_ref),
        });
    }
    Ok(())
}

/// Rewrite `extents` to reflect moving `[source_vcn, source_vcn+count)` to
/// `dest_lcn`: split any run crossing the move boundary, retarget the LCN
/// of the affected middle, and merge runs that become VCN- and
/// LCN-contiguous as a result. Returns the old LCN sub-ranges vacated by
/// the move, for the caller to add back to the free list.
///
/// Grounded on [`crate::host::mock::MockVolume::move_extent`]'s model
/// update, which performs the identical transformation on the mock host's
/// own copy of a stream's runlist.
fn rewrite_stream_extents(
    extents: &mut Vec<Extent>,
    source_vcn: Vcn,
    count: ClusterCount,
    dest_lcn: Lcn,
) -> Vec<(Lcn, ClusterCount)> {
    let move_start = source_vcn.0;
    let move_end = source_vcn.0 + count.0;
    let mut freed = Vec::new();
    let mut rebuilt = Vec::with_capacity(extents.len() + 2);

    for e in extents.iter() {
        let run_start = e.vcn.0;
        let run_end = e.vcn.0 + e.length.0;

        if run_end <= move_start || run_start >= move_end {
            rebuilt.push(*e);
            continue;
        }

        if run_start < move_start {
            rebuilt.push(Extent { vcn: e.vcn, lcn: e.lcn, length: ClusterCount(move_start - run_start) });
        }

        let affected_start = move_start.max(run_start);
        let affected_end = move_end.min(run_end);
        let affected_len = affected_end - affected_start;
        let lcn_offset = affected_start - move_start;

        if !e.is_sparse() {
            freed.push((Lcn(e.lcn.0 + (affected_start - run_start)), ClusterCount(affected_len)));
        }

        let new_lcn = if e.is_sparse() { Lcn::SPARSE } else { Lcn(dest_lcn.0 + lcn_offset) };
        rebuilt.push(Extent {
            vcn: Vcn(affected_start),
            lcn: new_lcn,
            length: ClusterCount(affected_len),
        });

        if run_end > move_end {
            let rem_start = move_end;
            let rem_lcn = if e.is_sparse() { Lcn::SPARSE } else { Lcn(e.lcn.0 + (rem_start - run_start)) };
            rebuilt.push(Extent {
                vcn: Vcn(rem_start),
                lcn: rem_lcn,
                length: ClusterCount(run_end - rem_start),
            });
        }
    }

    let mut merged: Vec<Extent> = Vec::with_capacity(rebuilt.len());
    for run in rebuilt {
        if let Some(last) = merged.last_mut() {
            let contiguous_vcn = last.vcn_end() == run.vcn;
            let contiguous_lcn = !last.is_sparse() && !run.is_sparse() && last.lcn.0 + last.length.0 == run.lcn.0;
            if contiguous_vcn && contiguous_lcn {
                last.length = ClusterCount(last.length.0 + run.length.0);
                continue;
            }
        }
        merged.push(run);
    }

    *extents = merged;
    freed
}
