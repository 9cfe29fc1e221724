//! Ancillary data entries
//!
//! Every entry is one opaque 64-bit word. A family owns the interpretation of
//! the entries it reserves and reads them through one of the typed views
//! below; the array itself never knows which view applies.

/// One 8-byte ancillary slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct CacheEntry(u64);

impl CacheEntry {
    /// An all-zero entry
    pub const EMPTY: CacheEntry = CacheEntry(0);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }
}

/// First entry of every two-entry family
///
/// Layout (low to high bits): original operand (8), counter (8),
/// cached slot index (16), guard version (32).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdaptiveEntry {
    /// Operand from the static stream; the quickened operand holds the cache offset
    pub original_arg: u8,
    /// Execution counter while adaptive, saturating counter while specialized
    pub counter: u8,
    /// Cached slot index (namespace slot, instance field)
    pub index: u16,
    /// Guard token (keys version, shape id, function version, builtin id)
    pub version: u32,
}

impl AdaptiveEntry {
    /// Fresh entry for a newly quickened site
    pub const fn new(original_arg: u8) -> Self {
        Self {
            original_arg,
            counter: 0,
            index: 0,
            version: 0,
        }
    }
}

impl From<CacheEntry> for AdaptiveEntry {
    fn from(entry: CacheEntry) -> Self {
        let bits = entry.0;
        Self {
            original_arg: bits as u8,
            counter: (bits >> 8) as u8,
            index: (bits >> 16) as u16,
            version: (bits >> 32) as u32,
        }
    }
}

impl From<AdaptiveEntry> for CacheEntry {
    fn from(entry: AdaptiveEntry) -> Self {
        CacheEntry(
            entry.original_arg as u64
                | (entry.counter as u64) << 8
                | (entry.index as u64) << 16
                | (entry.version as u64) << 32,
        )
    }
}

/// Second entry of a two-entry family: two extra guard tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionPair {
    pub first: u32,
    pub second: u32,
}

impl From<CacheEntry> for VersionPair {
    fn from(entry: CacheEntry) -> Self {
        Self {
            first: entry.0 as u32,
            second: (entry.0 >> 32) as u32,
        }
    }
}

impl From<VersionPair> for CacheEntry {
    fn from(pair: VersionPair) -> Self {
        CacheEntry(pair.first as u64 | (pair.second as u64) << 32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_is_one_word() {
        assert_eq!(std::mem::size_of::<CacheEntry>(), 8);
    }

    #[test]
    fn test_adaptive_entry_fields_do_not_overlap() {
        let entry = AdaptiveEntry {
            original_arg: 0xAB,
            counter: 0xCD,
            index: 0x1234,
            version: 0xDEAD_BEEF,
        };
        let bits = CacheEntry::from(entry).bits();
        assert_eq!(bits, 0xDEAD_BEEF_1234_CDAB);
        assert_eq!(AdaptiveEntry::from(CacheEntry::from_bits(bits)), entry);
    }

    #[test]
    fn test_version_pair_layout() {
        let pair = VersionPair {
            first: 7,
            second: u32::MAX,
        };
        assert_eq!(CacheEntry::from(pair).bits(), 0xFFFF_FFFF_0000_0007);
        assert_eq!(VersionPair::from(CacheEntry::from(pair)), pair);
    }

    #[test]
    fn test_fresh_entry_keeps_operand_only() {
        let entry = AdaptiveEntry::new(3);
        assert_eq!(CacheEntry::from(entry).bits(), 3);
        assert_eq!(AdaptiveEntry::from(CacheEntry::EMPTY), AdaptiveEntry::default());
    }
}
