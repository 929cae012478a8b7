//! Consolidates the BIOS/bootloader-provided memory map (E820-style
//! entries) into a sorted, non-overlapping, gap-free set of typed
//! regions that the rest of `mm` builds allocators from.
//!
//! Consolidation does three things: sorts by base address, splits or
//! trims any overlapping entries with `Usable` losing to anything more
//! specific (a `Reserved` region always wins a conflict, since treating
//! reserved memory as usable is the unsafe failure mode), and merges
//! adjacent same-kind regions into one.

use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RegionKind {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    Bad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: u32,
    pub len: u32,
    pub kind: RegionKind,
}

impl Region {
    fn end(&self) -> u32 {
        self.base + self.len
    }
}

pub struct MemoryMap {
    raw: Vec<Region>,
    consolidated: Vec<Region>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self {
            raw: Vec::new(),
            consolidated: Vec::new(),
        }
    }

    /// Adds a raw firmware-reported entry. Call `consolidate` once all
    /// entries have been added.
    pub fn add_region(&mut self, base: u32, len: u32, kind: RegionKind) {
        if len > 0 {
            self.raw.push(Region { base, len, kind });
        }
    }

    /// Sorts, deconflicts and merges the raw entries added so far.
    /// `RegionKind` order (`Usable < Reserved < ... < Bad`) doubles as
    /// conflict precedence: in an overlap, the entry with the *higher*
    /// ordinal kind wins the contested bytes, since every non-`Usable`
    /// kind is a stronger claim that the memory must not be handed out.
    pub fn consolidate(&mut self) {
        let mut entries = self.raw.clone();
        entries.sort_by_key(|r| r.base);

        let mut events: Vec<(u32, i32, RegionKind)> = Vec::new();
        for r in &entries {
            events.push((r.base, 1, r.kind));
            events.push((r.end(), -1, r.kind));
        }
        events.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let mut active: Vec<RegionKind> = Vec::new();
        let mut result: Vec<Region> = Vec::new();
        let mut last_point: Option<u32> = None;

        for &(point, delta, kind) in &events {
            if let Some(start) = last_point {
                if point > start && !active.is_empty() {
                    let strongest = *active.iter().max().unwrap();
                    push_or_extend(&mut result, start, point - start, strongest);
                }
            }
            if delta > 0 {
                active.push(kind);
            } else if let Some(pos) = active.iter().position(|k| *k == kind) {
                active.remove(pos);
            }
            last_point = Some(point);
        }

        self.consolidated = result;
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.consolidated.iter()
    }

    pub fn usable_regions(&self) -> impl Iterator<Item = &Region> {
        self.consolidated
            .iter()
            .filter(|r| r.kind == RegionKind::Usable)
    }

    pub fn reserved_regions(&self) -> impl Iterator<Item = &Region> {
        self.consolidated
            .iter()
            .filter(|r| r.kind == RegionKind::Reserved)
    }

    pub fn total_usable(&self) -> u64 {
        self.usable_regions().map(|r| r.len as u64).sum()
    }
}

fn push_or_extend(result: &mut Vec<Region>, base: u32, len: u32, kind: RegionKind) {
    if let Some(last) = result.last_mut() {
        if last.kind == kind && last.end() == base {
            last.len += len;
            return;
        }
    }
    result.push(Region { base, len, kind });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_adjacent_usable_regions() {
        let mut map = MemoryMap::new();
        map.add_region(0x1000, 0x1000, RegionKind::Usable);
        map.add_region(0x2000, 0x1000, RegionKind::Usable);
        map.consolidate();
        let regions: Vec<_> = map.regions().collect();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].base, 0x1000);
        assert_eq!(regions[0].len, 0x2000);
    }

    #[test]
    fn reserved_wins_an_overlap_with_usable() {
        let mut map = MemoryMap::new();
        map.add_region(0x1000, 0x2000, RegionKind::Usable);
        map.add_region(0x1800, 0x800, RegionKind::Reserved);
        map.consolidate();
        let regions: Vec<_> = map.regions().collect();
        assert!(regions
            .iter()
            .any(|r| r.kind == RegionKind::Reserved && r.base == 0x1800));
        assert_eq!(map.total_usable(), 0x800 + 0x800);
    }

    #[test]
    fn non_overlapping_regions_stay_distinct() {
        let mut map = MemoryMap::new();
        map.add_region(0x1000, 0x1000, RegionKind::Usable);
        map.add_region(0x10000, 0x1000, RegionKind::Usable);
        map.consolidate();
        assert_eq!(map.regions().count(), 2);
    }
}
