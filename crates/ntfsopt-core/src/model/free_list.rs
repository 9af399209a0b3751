//! The free-region list (spec §3 "Free region", §4.2 "Free-region operations").
//!
//! Kept as a plain sorted `Vec` rather than a linked structure — spec §9
//! calls out "doubly-linked circular lists of variable-size items" as a
//! pattern to replace with an ordered container, and the teacher's own
//! arena-backed [`crate::model::file_tree`] makes the same trade (flat,
//! index-addressable storage over pointer graphs).
use crate::types::{ClusterCount, Lcn};

/// A maximal contiguous run of free clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRegion {
    pub lcn: Lcn,
    pub length: ClusterCount,
}

impl FreeRegion {
    #[inline]
    fn end(&self) -> u64 {
        self.lcn.0 + self.length.0
    }
}

/// Strictly-ascending, non-adjacent, non-overlapping list of [`FreeRegion`]s
/// (spec §4.2 invariants). `add`/`sub` are the only mutators; everything
/// else reads.
#[derive(Debug, Clone, Default)]
pub struct FreeList {
    regions: Vec<FreeRegion>,
}

impl FreeList {
    pub fn new() -> Self {
        Self { regions: Vec::new() }
    }

    /// Build directly from an already-ascending, already-merged list (e.g.
    /// produced by scanning the bitmap for zero-runs). Caller is
    /// responsible for the ordering; debug-asserted on entry.
    pub fn from_regions(regions: Vec<FreeRegion>) -> Self {
        let list = Self { regions };
        debug_assert!(list.check_invariants(), "FreeList::from_regions: invariant violated");
        list
    }

    pub fn regions(&self) -> &[FreeRegion] {
        &self.regions
    }

    pub fn iter(&self) -> impl Iterator<Item = &FreeRegion> {
        self.regions.iter()
    }

    pub fn total_free(&self) -> u64 {
        self.regions.iter().map(|r| r.length.0).sum()
    }

    /// First region with `length >= k`, searched in ascending `lcn` order
    /// (spec §4.3 "Target selection (defragmentation)": first-fit).
    pub fn first_fit(&self, k: ClusterCount) -> Option<FreeRegion> {
        self.regions.iter().copied().find(|r| r.length.0 >= k.0)
    }

    /// First region with `length >= k`, in ascending `lcn` order, that does
    /// not overlap `exclude` (spec §4.3 "Target selection (optimization)":
    /// "must not shrink the MFT zone below its declared boundary... when
    /// the only large-enough free region lies inside the MFT zone, skip
    /// this stream").
    pub fn first_fit_excluding(&self, k: ClusterCount, exclude: Option<(Lcn, ClusterCount)>) -> Option<FreeRegion> {
        let Some((ex_lcn, ex_len)) = exclude else {
            return self.first_fit(k);
        };
        if ex_len.is_zero() {
            return self.first_fit(k);
        }
        let ex_end = ex_lcn.0 + ex_len.0;
        self.regions
            .iter()
            .copied()
            .find(|r| r.length.0 >= k.0 && (r.lcn.0 + r.length.0 <= ex_lcn.0 || r.lcn.0 >= ex_end))
    }

    /// First region with `length >= k`, in ascending `lcn` order, that ends
    /// at or before `limit_lcn` and does not overlap `exclude`. Used to keep
    /// a compacting move strictly leftward of the stream's current
    /// footprint (spec §4.3 "Target selection (optimization)" combined with
    /// spec §8's fixed-point requirement: without this bound, a stream
    /// already packed at the front gets reassigned to the hole its own
    /// earlier move vacated further right, oscillating forever instead of
    /// converging).
    pub fn first_fit_before_excluding(
        &self,
        k: ClusterCount,
        limit_lcn: Lcn,
        exclude: Option<(Lcn, ClusterCount)>,
    ) -> Option<FreeRegion> {
        let (ex_lcn, ex_len) = exclude.unwrap_or((Lcn(0), ClusterCount(0)));
        let ex_end = ex_lcn.0 + ex_len.0;
        self.regions
            .iter()
            .copied()
            .filter(|r| r.end() <= limit_lcn.0)
            .find(|r| r.length.0 >= k.0 && (ex_len.is_zero() || r.lcn.0 + r.length.0 <= ex_lcn.0 || r.lcn.0 >= ex_end))
    }

    /// First region with `length >= k` whose start is at or after `min_lcn`,
    /// excluding any region overlapping `[zone_start, zone_end)` unless no
    /// other candidate exists (spec §4.3 MFT-zone boundary rule is applied
    /// by the caller; this just offers a lower bound on the search).
    pub fn first_fit_from(&self, k: ClusterCount, min_lcn: Lcn) -> Option<FreeRegion> {
        self.regions
            .iter()
            .copied()
            .filter(|r| r.lcn.0 + r.length.0 > min_lcn.0)
            .find(|r| {
                let usable_start = r.lcn.0.max(min_lcn.0);
                r.lcn.0 + r.length.0 - usable_start >= k.0
            })
    }

    /// Whether `[lcn, lcn+length)` lies entirely within one free region
    /// (spec §4.4 step 1: "assert destination region entirely free").
    pub fn contains(&self, lcn: Lcn, length: ClusterCount) -> bool {
        if length.is_zero() {
            return true;
        }
        let end = lcn.0 + length.0;
        self.regions
            .iter()
            .any(|r| r.lcn.0 <= lcn.0 && r.end() >= end)
    }

    /// Insert `[lcn, lcn+length)` as free, merging with neighbors (spec
    /// §4.2 `add`).
    pub fn add(&mut self, lcn: Lcn, length: ClusterCount) {
        if length.is_zero() {
            return;
        }
        let new_end = lcn.0 + length.0;
        let idx = self.regions.partition_point(|r| r.lcn.0 < lcn.0);

        let abuts_pred = idx > 0 && self.regions[idx - 1].end() == lcn.0;
        let abuts_succ = idx < self.regions.len() && self.regions[idx].lcn.0 == new_end;

        match (abuts_pred, abuts_succ) {
            (true, true) => {
                let succ = self.regions.remove(idx);
                let pred = &mut self.regions[idx - 1];
                pred.length = ClusterCount(succ.end() - pred.lcn.0);
            }
            (true, false) => {
                let pred = &mut self.regions[idx - 1];
                pred.length = ClusterCount(new_end - pred.lcn.0);
            }
            (false, true) => {
                let succ = &mut self.regions[idx];
                let new_len = succ.end() - lcn.0;
                succ.lcn = lcn;
                succ.length = ClusterCount(new_len);
            }
            (false, false) => {
                self.regions.insert(idx, FreeRegion { lcn, length });
            }
        }
    }

    /// Remove `[lcn, lcn+length)` from the free set (spec §4.2 `sub`).
    /// A no-op over ranges with no overlap.
    pub fn sub(&mut self, lcn: Lcn, length: ClusterCount) {
        if length.is_zero() {
            return;
        }
        let remove_start = lcn.0;
        let remove_end = lcn.0 + length.0;

        let mut i = 0;
        while i < self.regions.len() {
            let r = self.regions[i];
            let r_start = r.lcn.0;
            let r_end = r.end();

            if r_end <= remove_start || r_start >= remove_end {
                i += 1;
                continue;
            }

            if remove_start <= r_start && remove_end >= r_end {
                // (a) wholly contained.
                self.regions.remove(i);
                continue;
            } else if remove_start <= r_start && remove_end < r_end {
                // (b) right end trimmed — region's head is consumed.
                self.regions[i].lcn = Lcn(remove_end);
                self.regions[i].length = ClusterCount(r_end - remove_end);
                i += 1;
            } else if remove_start > r_start && remove_end >= r_end {
                // (c) left end trimmed.
                self.regions[i].length = ClusterCount(remove_start - r_start);
                i += 1;
            } else {
                // (d) middle punched out: shrink in place, re-add the tail.
                self.regions[i].length = ClusterCount(remove_start - r_start);
                let tail_lcn = Lcn(remove_end);
                let tail_len = ClusterCount(r_end - remove_end);
                i += 1;
                self.regions.insert(i, FreeRegion {
                    lcn: tail_lcn,
                    length: tail_len,
                });
                i += 1;
            }
        }
    }

    /// Check the invariants spec §4.2/§8 require after every operation:
    /// non-empty regions, strictly ascending LCN, no adjacency/overlap.
    pub fn check_invariants(&self) -> bool {
        if self.regions.iter().any(|r| r.length.is_zero()) {
            return false;
        }
        self.regions
            .windows(2)
            .all(|w| w[0].lcn.0 + w[0].length.0 < w[1].lcn.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_no_op_on_zero_length() {
        let mut f = FreeList::new();
        f.add(Lcn(10), ClusterCount(0));
        assert!(f.regions().is_empty());
    }

    #[test]
    fn sub_no_op_on_disjoint_range() {
        let mut f = FreeList::from_regions(vec![FreeRegion {
            lcn: Lcn(0),
            length: ClusterCount(10),
        }]);
        f.sub(Lcn(100), ClusterCount(5));
        assert_eq!(f.regions(), &[FreeRegion { lcn: Lcn(0), length: ClusterCount(10) }]);
    }

    #[test]
    fn add_merges_both_neighbors() {
        let mut f = FreeList::from_regions(vec![
            FreeRegion { lcn: Lcn(0), length: ClusterCount(5) },
            FreeRegion { lcn: Lcn(10), length: ClusterCount(5) },
        ]);
        f.add(Lcn(5), ClusterCount(5));
        assert_eq!(f.regions(), &[FreeRegion { lcn: Lcn(0), length: ClusterCount(15) }]);
    }

    #[test]
    fn add_extends_predecessor_only() {
        let mut f = FreeList::from_regions(vec![FreeRegion { lcn: Lcn(0), length: ClusterCount(5) }]);
        f.add(Lcn(5), ClusterCount(5));
        assert_eq!(f.regions(), &[FreeRegion { lcn: Lcn(0), length: ClusterCount(10) }]);
    }

    #[test]
    fn add_inserts_disjoint_region() {
        let mut f = FreeList::from_regions(vec![FreeRegion { lcn: Lcn(0), length: ClusterCount(5) }]);
        f.add(Lcn(100), ClusterCount(5));
        assert_eq!(
            f.regions(),
            &[
                FreeRegion { lcn: Lcn(0), length: ClusterCount(5) },
                FreeRegion { lcn: Lcn(100), length: ClusterCount(5) },
            ]
        );
    }

    #[test]
    fn sub_wholly_contained_deletes() {
        let mut f = FreeList::from_regions(vec![FreeRegion { lcn: Lcn(10), length: ClusterCount(5) }]);
        f.sub(Lcn(5), ClusterCount(20));
        assert!(f.regions().is_empty());
    }

    #[test]
    fn sub_punches_hole_in_middle() {
        let mut f = FreeList::from_regions(vec![FreeRegion { lcn: Lcn(0), length: ClusterCount(20) }]);
        f.sub(Lcn(5), ClusterCount(5));
        assert_eq!(
            f.regions(),
            &[
                FreeRegion { lcn: Lcn(0), length: ClusterCount(5) },
                FreeRegion { lcn: Lcn(10), length: ClusterCount(10) },
            ]
        );
    }

    #[test]
    fn add_then_sub_is_identity() {
        let original = vec![
            FreeRegion { lcn: Lcn(0), length: ClusterCount(5) },
            FreeRegion { lcn: Lcn(20), length: ClusterCount(10) },
        ];
        let mut f = FreeList::from_regions(original.clone());
        f.add(Lcn(40), ClusterCount(7));
        f.sub(Lcn(40), ClusterCount(7));
        assert_eq!(f.regions(), original.as_slice());
    }

    #[test]
    fn first_fit_returns_smallest_index_match() {
        let f = FreeList::from_regions(vec![
            FreeRegion { lcn: Lcn(0), length: ClusterCount(3) },
            FreeRegion { lcn: Lcn(10), length: ClusterCount(8) },
        ]);
        assert_eq!(
            f.first_fit(ClusterCount(5)),
            Some(FreeRegion { lcn: Lcn(10), length: ClusterCount(8) })
        );
    }

    #[test]
    fn invariants_hold_after_fuzz_like_sequence() {
        let mut f = FreeList::from_regions(vec![FreeRegion { lcn: Lcn(0), length: ClusterCount(100) }]);
        f.sub(Lcn(10), ClusterCount(5));
        f.sub(Lcn(50), ClusterCount(10));
        f.add(Lcn(10), ClusterCount(5));
        f.sub(Lcn(0), ClusterCount(3));
        assert!(f.check_invariants());
    }

    #[test]
    fn first_fit_before_excluding_ignores_regions_at_or_past_limit() {
        let f = FreeList::from_regions(vec![
            FreeRegion { lcn: Lcn(10), length: ClusterCount(20) },
            FreeRegion { lcn: Lcn(100), length: ClusterCount(20) },
        ]);
        // A region entirely right of the limit is not a candidate, even
        // though it would satisfy a plain `first_fit`.
        assert_eq!(f.first_fit_before_excluding(ClusterCount(5), Lcn(50), None), Some(FreeRegion {
            lcn: Lcn(10),
            length: ClusterCount(20),
        }));
        // Once the stream's own position is at the very front, nothing
        // qualifies — this is what makes compaction a fixed point.
        assert_eq!(f.first_fit_before_excluding(ClusterCount(5), Lcn(10), None), None);
    }

    #[test]
    fn first_fit_before_excluding_still_honors_mft_zone() {
        let f = FreeList::from_regions(vec![FreeRegion { lcn: Lcn(0), length: ClusterCount(20) }]);
        assert_eq!(
            f.first_fit_before_excluding(ClusterCount(10), Lcn(50), Some((Lcn(0), ClusterCount(20)))),
            None
        );
    }
}
