//! Deterministic hash-to-bucket primitives (component C1).
//!
//! Every traffic decision in this SDK reduces to: hash a seed and an
//! identifier down to an integer bucket, then test that bucket against a
//! range or a bitmap. This module is the only place that owns the hash
//! function, so that the whole engine stays reproducible across processes
//! and across languages talking to the same control plane.

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

/// Hash methods a domain/layer/experiment/condition may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashMethod {
    /// BKDR rolling hash, seeded.
    Bkdr,
}

impl Default for HashMethod {
    fn default() -> Self {
        HashMethod::Bkdr
    }
}

/// Compute `bucket(method, seed, id, size) -> bucket in [1, size]`.
///
/// Pure and deterministic: the same arguments always produce the same
/// bucket, on any platform.
pub fn bucket(method: HashMethod, seed: u32, id: &str, size: u32) -> u32 {
    debug_assert!(size > 0, "bucket size must be positive");
    let size = size.max(1);
    let h = match method {
        HashMethod::Bkdr => bkdr_hash(seed, id),
    };
    (h % size as u64) as u32 + 1
}

/// BKDR rolling hash seeded by `seed`, folded into a 64-bit accumulator to
/// avoid the overflow wraparound a 32-bit accumulator would suffer on long
/// ids.
fn bkdr_hash(seed: u32, id: &str) -> u64 {
    let multiplier = 131u64.wrapping_add(seed as u64 % 31);
    let mut hash: u64 = 0;
    for byte in id.as_bytes() {
        hash = hash.wrapping_mul(multiplier).wrapping_add(*byte as u64);
    }
    hash
}

/// A half-open-free, inclusive bucket range `[left, right]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    /// Inclusive lower bound.
    pub left: u32,
    /// Inclusive upper bound.
    pub right: u32,
}

impl Range {
    /// Construct a new range; callers are responsible for `left <= right`.
    pub fn new(left: u32, right: u32) -> Self {
        Range { left, right }
    }

    /// Whether `bucket` falls inside this range.
    pub fn contains(&self, bucket: u32) -> bool {
        self.left > 0 && self.left <= self.right && self.left <= bucket && bucket <= self.right
    }
}

/// How a bucket-info's membership set is represented on the wire and in the
/// published snapshot.
#[derive(Debug, Clone)]
pub enum BucketInfo {
    /// A small set of inclusive ranges.
    Ranges(Vec<Range>),
    /// A decoded bitmap. Decoded exactly once, at snapshot-publish time.
    Bitmap(RoaringBitmap),
}

impl BucketInfo {
    /// Build a [`BucketInfo::Bitmap`] from a roaring-bitmap wire buffer,
    /// decoding it immediately. Intended to be called once, during snapshot
    /// construction, never on the assignment hot path.
    pub fn from_bitmap_bytes(bytes: &[u8]) -> Result<Self, String> {
        RoaringBitmap::deserialize_from(bytes)
            .map(BucketInfo::Bitmap)
            .map_err(|e| format!("invalid bitmap buffer: {e}"))
    }

    /// Test whether `bucket` is a member.
    pub fn hit(&self, bucket: u32) -> bool {
        match self {
            BucketInfo::Ranges(ranges) => hit_traffic(bucket, ranges),
            BucketInfo::Bitmap(set) => set.contains(bucket),
        }
    }
}

/// `hit-traffic(bucket, ranges) = exists r in ranges: r.left <= bucket <= r.right`.
pub fn hit_traffic(bucket: u32, ranges: &[Range]) -> bool {
    ranges.iter().any(|r| r.contains(bucket))
}

/// Full-flow detection: the union of `ranges` (merged) covers `[1, size]`,
/// allowing a single starting gap at or before bucket 1.
///
/// Implementation mirrors the control-plane's own check: sort by
/// `(left, right)`, reject if the first range starts after 1, then walk
/// extending a running right-edge; any gap between consecutive ranges fails
/// the check; finally the running edge must reach at least `size`.
pub fn is_full_flow(ranges: &[Range], size: u32) -> bool {
    if ranges.is_empty() || size == 0 {
        return false;
    }
    let mut sorted: Vec<Range> = ranges.to_vec();
    sorted.sort_by_key(|r| (r.left, r.right));

    if sorted[0].left > 1 {
        return false;
    }

    let mut right = sorted[0].right;
    for r in &sorted[1..] {
        if right + 1 < r.left {
            return false;
        }
        right = right.max(r.right);
    }
    right >= size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_deterministic_and_in_range() {
        for id in ["user-1", "user-2", "", "unicode-™"] {
            let b1 = bucket(HashMethod::Bkdr, 7, id, 10_000);
            let b2 = bucket(HashMethod::Bkdr, 7, id, 10_000);
            assert_eq!(b1, b2);
            assert!(b1 >= 1 && b1 <= 10_000);
        }
    }

    #[test]
    fn different_seeds_usually_diverge() {
        let a = bucket(HashMethod::Bkdr, 1, "user-1", 10_000);
        let b = bucket(HashMethod::Bkdr, 2, "user-1", 10_000);
        assert_ne!(a, b);
    }

    #[test]
    fn range_membership() {
        let r = Range::new(10, 20);
        assert!(r.contains(10));
        assert!(r.contains(20));
        assert!(!r.contains(9));
        assert!(!r.contains(21));
    }

    #[test]
    fn full_flow_single_range_covering_whole_space() {
        assert!(is_full_flow(&[Range::new(1, 10_000)], 10_000));
    }

    #[test]
    fn full_flow_allows_gap_at_start() {
        assert!(is_full_flow(&[Range::new(1, 5_000), Range::new(5_001, 10_000)], 10_000));
    }

    #[test]
    fn full_flow_rejects_gap_after_start() {
        assert!(!is_full_flow(&[Range::new(1, 100), Range::new(200, 10_000)], 10_000));
    }

    #[test]
    fn full_flow_rejects_starting_after_bucket_two() {
        assert!(!is_full_flow(&[Range::new(2, 10_000)], 10_000));
    }

    #[test]
    fn full_flow_rejects_short_coverage() {
        assert!(!is_full_flow(&[Range::new(1, 9_999)], 10_000));
    }

    #[test]
    fn bitmap_round_trips_through_bucket_info() {
        let mut set = RoaringBitmap::new();
        for b in [3u32, 7, 42, 1000] {
            set.insert(b);
        }
        let mut bytes = Vec::new();
        set.serialize_into(&mut bytes).unwrap();
        let info = BucketInfo::from_bitmap_bytes(&bytes).unwrap();
        assert!(info.hit(42));
        assert!(!info.hit(8));
    }
}
