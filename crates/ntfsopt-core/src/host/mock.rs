//! An in-memory host used by unit and integration tests (teacher pattern:
//! `tests/e2e_scanner.rs` exercises real code paths against a real
//! temporary filesystem; here we exercise the same code paths against a
//! real in-memory volume rather than mocking individual calls away).
use super::{BitmapChunk, Clock, ExtentQuery, Host, HostError, MoveExtent, StreamRef, Volume, VolumeInfo};
use crate::types::{ClusterCount, Lcn, MftIndex, Vcn};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// An in-memory volume: a flat byte buffer standing in for MFT record
/// storage, a bitmap, and a stream→extent map that [`MoveExtent`] mutates.
pub struct MockVolume {
    info: VolumeInfo,
    mft_records: Vec<Vec<u8>>,
    record_size: usize,
    bitmap: RwLock<Vec<u8>>,
    extents: RwLock<HashMap<StreamRef, Vec<(Vcn, Lcn, ClusterCount)>>>,
    fail_moves: RwLock<HashSet<(StreamRef, Vcn)>>,
    clock_base: Instant,
    clock_offset: RwLock<Duration>,
}

impl MockVolume {
    pub fn new(info: VolumeInfo, record_size: usize) -> Self {
        let bitmap_bytes = (info.total_clusters as usize).div_ceil(8).max(1);
        Self {
            info,
            mft_records: Vec::new(),
            record_size,
            bitmap: RwLock::new(vec![0u8; bitmap_bytes]),
            extents: RwLock::new(HashMap::new()),
            fail_moves: RwLock::new(HashSet::new()),
            clock_base: Instant::now(),
            clock_offset: RwLock::new(Duration::ZERO),
        }
    }

    /// Install raw MFT record bytes at sequential indices, for scanner tests.
    pub fn set_mft_records(&mut self, records: Vec<Vec<u8>>) {
        self.mft_records = records;
    }

    /// Mark clusters `[lcn, lcn+len)` as allocated in the bitmap.
    pub fn mark_allocated(&self, lcn: u64, len: u64) {
        let mut bitmap = self.bitmap.write();
        for i in lcn..lcn + len {
            let byte = (i / 8) as usize;
            let bit = (i % 8) as u8;
            if byte < bitmap.len() {
                bitmap[byte] |= 1 << bit;
            }
        }
    }

    /// Register a stream's current extent list, used by [`ExtentQuery`] and
    /// mutated in place by [`MoveExtent`].
    pub fn set_stream_extents(&self, stream: StreamRef, extents: Vec<(Vcn, Lcn, ClusterCount)>) {
        for &(_, lcn, len) in &extents {
            if !lcn.is_sparse() {
                self.mark_allocated(lcn.0, len.0);
            }
        }
        self.extents.write().insert(stream, extents);
    }

    /// Cause the next move touching `(stream, source_vcn)` to fail.
    pub fn inject_move_failure(&self, stream: StreamRef, source_vcn: Vcn) {
        self.fail_moves.write().insert((stream, source_vcn));
    }

    /// Advance the mock clock by `d` — lets tests exercise `TIME_LIMIT`
    /// deadlines deterministically.
    pub fn advance_clock(&self, d: Duration) {
        *self.clock_offset.write() += d;
    }
}

impl Volume for MockVolume {
    fn volume_read(&self, offset: u64, len: usize) -> Result<Vec<u8>, HostError> {
        let start = offset as usize;
        let flat: Vec<u8> = self.mft_records.concat();
        if start + len > flat.len() {
            return Err(HostError::new("read past end of mock volume"));
        }
        Ok(flat[start..start + len].to_vec())
    }

    fn volume_bitmap(&self, start_lcn: Lcn) -> Result<BitmapChunk, HostError> {
        let bitmap = self.bitmap.read();
        let start_byte = (start_lcn.0 / 8) as usize;
        if start_byte >= bitmap.len() {
            return Ok(BitmapChunk {
                bits: Vec::new(),
                next_start: None,
            });
        }
        Ok(BitmapChunk {
            bits: bitmap[start_byte..].to_vec(),
            next_start: None,
        })
    }

    fn mft_record(&self, index: MftIndex, record_size: usize) -> Result<Vec<u8>, HostError> {
        let idx = index.0 as usize;
        self.mft_records
            .get(idx)
            .cloned()
            .map(|mut r| {
                r.resize(record_size, 0);
                r
            })
            .ok_or_else(|| HostError::new(format!("no MFT record at index {idx}")))
    }

    fn volume_info(&self) -> Result<VolumeInfo, HostError> {
        Ok(self.info)
    }
}

impl ExtentQuery for MockVolume {
    fn extent_query(&self, stream: &StreamRef) -> Result<Vec<(Vcn, Lcn, ClusterCount)>, HostError> {
        self.extents
            .read()
            .get(stream)
            .cloned()
            .ok_or_else(|| HostError::new("unknown stream"))
    }
}

impl MoveExtent for MockVolume {
    fn move_extent(
        &self,
        stream: &StreamRef,
        source_vcn: Vcn,
        target_lcn: Lcn,
        count: ClusterCount,
    ) -> Result<(), HostError> {
        if self
            .fail_moves
            .write()
            .remove(&(stream.clone(), source_vcn))
        {
            return Err(HostError::new("injected move failure"));
        }

        let mut extents = self.extents.write();
        let list = extents
            .get_mut(stream)
            .ok_or_else(|| HostError::new("unknown stream"))?;

        // Locate the run(s) covering [source_vcn, source_vcn+count), split
        // at the boundaries, retarget the LCN, and merge adjacent runs
        // whose LCNs now abut — mirrors the mover's own model update
        // (spec §4.4 step 4) so the mock stays internally consistent.
        let mut rebuilt = Vec::with_capacity(list.len() + 2);
        let move_start = source_vcn.0;
        let move_end = source_vcn.0 + count.0;

        for &(vcn, lcn, len) in list.iter() {
            let run_start = vcn.0;
            let run_end = vcn.0 + len.0;

            if run_end <= move_start || run_start >= move_end {
                rebuilt.push((vcn, lcn, len));
                continue;
            }

            // Left remainder, unaffected.
            if run_start < move_start {
                rebuilt.push((vcn, lcn, ClusterCount(move_start - run_start)));
            }

            // Affected middle: retarget LCN.
            let affected_start = move_start.max(run_start);
            let affected_end = move_end.min(run_end);
            let affected_len = affected_end - affected_start;
            let new_lcn_offset = affected_start - move_start;
            let new_lcn = if lcn.is_sparse() {
                Lcn::SPARSE
            } else {
                Lcn(target_lcn.0 + new_lcn_offset)
            };
            rebuilt.push((Vcn(affected_start), new_lcn, ClusterCount(affected_len)));

            // Right remainder, unaffected.
            if run_end > move_end {
                let rem_start = move_end;
                let rem_lcn = if lcn.is_sparse() {
                    Lcn::SPARSE
                } else {
                    Lcn(lcn.0 + (rem_start - run_start))
                };
                rebuilt.push((Vcn(rem_start), rem_lcn, ClusterCount(run_end - rem_start)));
            }
        }

        // Merge adjacent runs whose LCNs now abut.
        let mut merged: Vec<(Vcn, Lcn, ClusterCount)> = Vec::with_capacity(rebuilt.len());
        for run in rebuilt {
            if let Some(last) = merged.last_mut() {
                let (last_vcn, last_lcn, last_len) = *last;
                let contiguous_vcn = last_vcn.0 + last_len.0 == run.0 .0;
                let contiguous_lcn =
                    !last_lcn.is_sparse() && !run.1.is_sparse() && last_lcn.0 + last_len.0 == run.1 .0;
                if contiguous_vcn && contiguous_lcn {
                    last.2 = ClusterCount(last_len.0 + run.2 .0);
                    continue;
                }
            }
            merged.push(run);
        }

        *list = merged;
        Ok(())
    }
}

impl Clock for MockVolume {
    fn now(&self) -> Instant {
        self.clock_base + *self.clock_offset.read()
    }
}

/// A standalone mock `Host` implementation that only a `Clock` is asked
/// for, useful in planner/mover unit tests that build their own
/// [`crate::model::VolumeModel`] directly and just need a clock +
/// move-extent double.
pub fn mock_host(total_clusters: u64, bytes_per_cluster: u32) -> MockVolume {
    MockVolume::new(
        VolumeInfo {
            bytes_per_cluster,
            bytes_per_sector: 512,
            total_clusters,
            free_clusters: 0,
        },
        1024,
    )
}

// Re-exported so callers writing `use ntfsopt_core::host::mock::*;` get a
// ready-made `Host` bound.
impl Host for MockVolume {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_extent_retargets_and_merges() {
        let vol = mock_host(100, 4096);
        let stream = StreamRef {
            mft_index: MftIndex(20),
            stream_name: String::new(),
        };
        vol.set_stream_extents(
            stream.clone(),
            vec![
                (Vcn(0), Lcn(5), ClusterCount(10)),
                (Vcn(10), Lcn(20), ClusterCount(10)),
            ],
        );

        vol.move_extent(&stream, Vcn(0), Lcn(40), ClusterCount(10))
            .unwrap();
        vol.move_extent(&stream, Vcn(10), Lcn(50), ClusterCount(10))
            .unwrap();

        let extents = vol.extent_query(&stream).unwrap();
        assert_eq!(extents, vec![(Vcn(0), Lcn(40), ClusterCount(20))]);
    }

    #[test]
    fn injected_failure_leaves_extents_untouched() {
        let vol = mock_host(100, 4096);
        let stream = StreamRef {
            mft_index: MftIndex(20),
            stream_name: String::new(),
        };
        let original = vec![(Vcn(0), Lcn(5), ClusterCount(10))];
        vol.set_stream_extents(stream.clone(), original.clone());
        vol.inject_move_failure(stream.clone(), Vcn(0));

        let err = vol.move_extent(&stream, Vcn(0), Lcn(40), ClusterCount(10));
        assert!(err.is_err());
        assert_eq!(vol.extent_query(&stream).unwrap(), original);
    }

    #[test]
    fn clock_advances_deterministically() {
        let vol = mock_host(10, 512);
        let t0 = vol.now();
        vol.advance_clock(Duration::from_secs(5));
        let t1 = vol.now();
        assert_eq!(t1.duration_since(t0), Duration::from_secs(5));
    }
}
