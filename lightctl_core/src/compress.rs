//! Greedy repeat compression of channel timelines.
//!
//! The timeline is cut into non-overlapping windows of `L` entries. A window
//! followed by identical full windows is folded into one pattern with a repeat
//! count; a trailing partial window becomes a pattern of its own.

use crate::timeline::{ChannelTimeline, TimelineEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedPattern {
    pub pattern: Vec<TimelineEntry>,
    pub repeats: u32,
}

impl CompressedPattern {
    /// All entries are zero-length off states; such a pattern is never sent.
    pub fn is_dead(&self) -> bool {
        self.pattern.iter().all(TimelineEntry::is_dead)
    }

    pub fn has_pulse(&self) -> bool {
        self.pattern.iter().any(TimelineEntry::has_pulse)
    }
}

/// Compress a timeline with window length `pattern_length` (0 is treated as 1).
pub fn compress(entries: &[TimelineEntry], pattern_length: usize) -> Vec<CompressedPattern> {
    let l = pattern_length.max(1);
    let mut out: Vec<CompressedPattern> = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        let end = (i + l).min(entries.len());
        let window = &entries[i..end];
        let mut repeats: u32 = 1;
        let mut j = end;
        if window.len() == l {
            while j + l <= entries.len() && entries[j..j + l] == *window && repeats < u32::MAX {
                repeats += 1;
                j += l;
            }
        }
        out.push(CompressedPattern {
            pattern: window.to_vec(),
            repeats,
        });
        i = j;
    }
    out
}

/// Inverse of [`compress`].
pub fn expand(patterns: &[CompressedPattern]) -> Vec<TimelineEntry> {
    let mut out = Vec::new();
    for p in patterns {
        for _ in 0..p.repeats {
            out.extend_from_slice(&p.pattern);
        }
    }
    out
}

/// Number of commands a compressed channel emits (dead patterns excluded).
pub fn command_count(patterns: &[CompressedPattern]) -> usize {
    patterns.iter().filter(|p| !p.is_dead()).count()
}

/// Candidate lengths to evaluate: the configured candidates plus `configured`.
pub fn candidate_set(configured: usize, candidates: &[usize]) -> Vec<usize> {
    let mut set: Vec<usize> = candidates
        .iter()
        .copied()
        .chain(std::iter::once(configured))
        .filter(|&l| l > 0)
        .collect();
    set.sort_unstable();
    set.dedup();
    set
}

/// Command count per candidate length, in ascending length order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthReport {
    pub counts: Vec<(usize, usize)>,
    pub best: usize,
}

impl LengthReport {
    pub fn count_for(&self, length: usize) -> Option<usize> {
        self.counts
            .iter()
            .find(|(l, _)| *l == length)
            .map(|(_, c)| *c)
    }
}

/// Pick the length that minimizes the total emitted command count across all
/// channels; ties go to the smaller length.
pub fn choose_pattern_length(timelines: &[ChannelTimeline], candidates: &[usize]) -> LengthReport {
    let mut counts: Vec<(usize, usize)> = candidates
        .iter()
        .copied()
        .filter(|&l| l > 0)
        .map(|l| {
            let total = timelines
                .iter()
                .map(|tl| command_count(&compress(&tl.entries, l)))
                .sum();
            (l, total)
        })
        .collect();
    counts.sort_unstable();
    counts.dedup_by_key(|(l, _)| *l);
    let best = counts
        .iter()
        .min_by_key(|(l, c)| (*c, *l))
        .map_or(1, |(l, _)| *l);
    tracing::debug!(?counts, best, "pattern length evaluation");
    LengthReport { counts, best }
}
