//! Hash slot ranges and coverage accounting.
//!
//! A cluster splits the key space into 16384 slots. Masters advertise the
//! slots they own as closed ranges; this module holds the range type and a
//! per-slot counter used to find gaps and double ownership.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Total number of hash slots in the cluster.
pub const SLOT_COUNT: u16 = 16384;

/// Highest valid slot index.
pub const MAX_SLOT: u16 = SLOT_COUNT - 1;

/// A contiguous, closed range of slots.
///
/// # Invariants
///
/// `start <= end <= MAX_SLOT`. Construct through [`SlotRange::try_new`]
/// when the bounds come from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16, // inclusive
}

impl SlotRange {
    /// Creates a new slot range (end is inclusive).
    ///
    /// # Panics
    ///
    /// Panics if `start > end` or if `end > MAX_SLOT`.
    pub fn new(start: u16, end: u16) -> Self {
        assert!(start <= end, "SlotRange requires start <= end");
        assert!(end <= MAX_SLOT, "slot must be <= {MAX_SLOT}");
        Self { start, end }
    }

    /// Creates a slot range from untrusted bounds.
    ///
    /// Takes `u32` so that values like 99999 are reported as out of range
    /// instead of failing integer conversion first.
    pub fn try_new(start: u32, end: u32) -> Result<Self, ParseError> {
        if start > end || end > MAX_SLOT as u32 {
            return Err(ParseError::InvalidSlotRange { start, end });
        }
        Ok(Self {
            start: start as u16,
            end: end as u16,
        })
    }

    /// Creates a range containing a single slot.
    pub fn single(slot: u16) -> Self {
        Self::new(slot, slot)
    }

    /// Returns the number of slots in this range (always >= 1).
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u32 {
        (self.end - self.start) as u32 + 1
    }

    /// Returns true if this range contains the given slot.
    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Returns true if the two ranges share at least one slot.
    pub fn overlaps(&self, other: &SlotRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Returns an iterator over all slots in this range.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Sums the lengths of the given ranges.
pub fn slot_total(ranges: &[SlotRange]) -> u32 {
    ranges.iter().map(SlotRange::len).sum()
}

/// Formats slot ranges for display (e.g. "0-5460, 10923-16383").
pub fn format_ranges(ranges: &[SlotRange]) -> String {
    ranges
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Counts how many times each slot is claimed.
///
/// Unlike a plain sum of range lengths, this tells a gap plus an overlap
/// apart from full coverage.
#[derive(Debug, Clone)]
pub struct SlotCoverage {
    owners: Box<[u16; SLOT_COUNT as usize]>,
}

impl Default for SlotCoverage {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotCoverage {
    /// Creates a counter with no slots claimed.
    pub fn new() -> Self {
        Self {
            // Box it to keep 32KB off the stack
            owners: Box::new([0; SLOT_COUNT as usize]),
        }
    }

    /// Builds a counter from a list of ranges.
    pub fn from_ranges<'a>(ranges: impl IntoIterator<Item = &'a SlotRange>) -> Self {
        let mut coverage = Self::new();
        for range in ranges {
            coverage.claim(*range);
        }
        coverage
    }

    /// Records one claim on every slot of the range.
    pub fn claim(&mut self, range: SlotRange) {
        for slot in range.iter() {
            if let Some(count) = self.owners.get_mut(slot as usize) {
                *count = count.saturating_add(1);
            }
        }
    }

    /// Returns how many ranges claimed the slot.
    pub fn claims(&self, slot: u16) -> u16 {
        self.owners.get(slot as usize).copied().unwrap_or(0)
    }

    /// Returns the number of slots claimed at least once.
    pub fn covered(&self) -> u32 {
        self.owners.iter().filter(|&&c| c > 0).count() as u32
    }

    /// Returns true if every slot is claimed exactly once.
    pub fn is_complete(&self) -> bool {
        self.owners.iter().all(|&c| c == 1)
    }

    /// Returns the unclaimed slots as merged ranges.
    pub fn gaps(&self) -> Vec<SlotRange> {
        self.ranges_where(|c| c == 0)
    }

    /// Returns the slots claimed more than once as merged ranges.
    pub fn overlaps(&self) -> Vec<SlotRange> {
        self.ranges_where(|c| c > 1)
    }

    fn ranges_where(&self, pred: impl Fn(u16) -> bool) -> Vec<SlotRange> {
        let mut ranges = Vec::new();
        let mut start: Option<u16> = None;

        for (idx, &count) in self.owners.iter().enumerate() {
            let slot = idx as u16;
            match (pred(count), start) {
                (true, None) => start = Some(slot),
                (false, Some(s)) => {
                    ranges.push(SlotRange::new(s, slot - 1));
                    start = None;
                }
                _ => {}
            }
        }

        // close any open range at the end
        if let Some(s) = start {
            ranges.push(SlotRange::new(s, MAX_SLOT));
        }
        ranges
    }
}
