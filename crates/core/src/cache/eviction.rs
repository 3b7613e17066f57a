//! Bounded-size eviction.
//!
//! A sweep trims a partition back toward its item bound by removing the oldest
//! unpinned entries first. Pinned entries are never selected, so a partition
//! whose pinned entries alone exceed the bound stays over it until the page
//! unpins something.

use super::store::EntryMeta;

/// Decides whether an entry is exempt from eviction.
pub trait PinPolicy {
    /// Whether the entry stored under `url` must survive the sweep.
    fn is_pinned(&self, url: &str) -> bool;
}

/// Pin policy of partitions without a pinning concept.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPins;

impl PinPolicy for NoPins {
    fn is_pinned(&self, _url: &str) -> bool {
        false
    }
}

impl<F> PinPolicy for F
where
    F: Fn(&str) -> bool,
{
    fn is_pinned(&self, url: &str) -> bool {
        self(url)
    }
}

/// Select the entries a sweep removes.
///
/// `overflow = max(0, len - max_items)`; the `overflow` oldest unpinned entries
/// (by insertion sequence) are returned, oldest first. Fewer are returned when
/// not enough unpinned entries exist.
pub fn plan<'a, P>(entries: &'a [EntryMeta], max_items: usize, pins: &P) -> Vec<&'a EntryMeta>
where
    P: PinPolicy + ?Sized,
{
    let overflow = entries.len().saturating_sub(max_items);
    if overflow == 0 {
        return Vec::new();
    }

    let mut candidates: Vec<&EntryMeta> = entries.iter().filter(|e| !pins.is_pinned(&e.url)).collect();
    candidates.sort_by_key(|e| e.seq);
    candidates.truncate(overflow);
    candidates
}
