//! Silicon variant identification.
//!
//! Part tables are small (on the order of a hundred entries across both
//! families) and looked up once per probe, so a sorted static slice plus
//! binary search is the right tool -- no need for a hash map or a build-time
//! code generator.

/// One entry in a family's part table.
#[derive(Debug, Clone, Copy)]
pub struct PartEntry {
    /// `USERID.PART`.
    pub part_id: u32,
    /// `USERID.VARIANT`.
    pub variant_id: u32,
    /// Human-readable chip name, e.g. `"MSPM0G3507SRGZR"`.
    pub name: &'static str,
}

/// A silicon family: a `DID.PART_NUM` value, a generic fallback name, and a
/// sorted table of known parts.
#[derive(Debug, Clone, Copy)]
pub struct Family {
    /// `DID.PART_NUM`, e.g. `0xBB88` for MSPM0G.
    pub family_id: u32,
    /// Name used when the exact part/variant is not in `parts`.
    pub generic_name: &'static str,
    /// Entries sorted by `(part_id, variant_id)`.
    pub parts: &'static [PartEntry],
}

impl Family {
    /// Looks up the exact `(part_id, variant_id)` pair.
    ///
    /// A family hit with no matching part is *not* an error: the caller
    /// falls back to [`Family::generic_name`] and proceeds.
    pub fn lookup(&self, part_id: u32, variant_id: u32) -> Option<&'static str> {
        self.parts
            .binary_search_by_key(&(part_id, variant_id), |e| (e.part_id, e.variant_id))
            .ok()
            .map(|idx| self.parts[idx].name)
    }
}

/// `DID.PART_NUM` for the MSPM0L family.
pub const MSPM0L_FAMILY_ID: u32 = 0xBB82;
/// `DID.PART_NUM` for the MSPM0G family.
pub const MSPM0G_FAMILY_ID: u32 = 0xBB88;

macro_rules! part_table {
    ($name:ident => [$(($part:expr, $variant:expr, $chip:expr)),* $(,)?]) => {
        pub static $name: &[PartEntry] = &[
            $(PartEntry { part_id: $part, variant_id: $variant, name: $chip }),*
        ];
    };
}

// Sorted by (part_id, variant_id). Entries are representative of the
// MSPM0L-series lineup; add further package/speed-grade variants as they
// are released.
part_table!(MSPM0L_PARTS => [
    (0x1105, 0xF6, "MSPM0L1105SRGER"),
    (0x1105, 0xF7, "MSPM0L1105SRGZR"),
    (0x1106, 0xF6, "MSPM0L1106SRGER"),
    (0x1106, 0xF7, "MSPM0L1106SRGZR"),
    (0x1227, 0xF6, "MSPM0L1227SRGER"),
    (0x1227, 0xF7, "MSPM0L1227SRGZR"),
    (0x1228, 0xF6, "MSPM0L1228SRGER"),
    (0x1228, 0xF7, "MSPM0L1228SRGZR"),
    (0x1303, 0xF6, "MSPM0L1303SRGER"),
    (0x1303, 0xF7, "MSPM0L1303SRGZR"),
    (0x1304, 0xF6, "MSPM0L1304SRGER"),
    (0x1304, 0xF7, "MSPM0L1304SRGZR"),
    (0x1305, 0xF6, "MSPM0L1305SRGER"),
    (0x1305, 0xF7, "MSPM0L1305SRGZR"),
    (0x1306, 0xF6, "MSPM0L1306SRGER"),
    (0x1306, 0xF7, "MSPM0L1306SRGZR"),
    (0x1307, 0xF6, "MSPM0L1307SRGER"),
    (0x1307, 0xF7, "MSPM0L1307SRGZR"),
    (0x1343, 0xF6, "MSPM0L1343SRHBR"),
    (0x1343, 0xF7, "MSPM0L1343SRGZR"),
    (0x1344, 0xF6, "MSPM0L1344SRHBR"),
    (0x1344, 0xF7, "MSPM0L1344SRGZR"),
]);

// Sorted by (part_id, variant_id). Entries are representative of the
// MSPM0G-series lineup.
part_table!(MSPM0G_PARTS => [
    (0x1505, 0xF6, "MSPM0G1505SRGER"),
    (0x1505, 0xF7, "MSPM0G1505SRGZR"),
    (0x1506, 0xF6, "MSPM0G1506SRGER"),
    (0x1506, 0xF7, "MSPM0G1506SRGZR"),
    (0x1507, 0xF6, "MSPM0G1507SRGER"),
    (0x1507, 0xF7, "MSPM0G1507SRGZR"),
    (0x3105, 0xF6, "MSPM0G3105SRGER"),
    (0x3105, 0xF7, "MSPM0G3105SRGZR"),
    (0x3106, 0xF6, "MSPM0G3106SRGER"),
    (0x3106, 0xF7, "MSPM0G3106SRGZR"),
    (0x3107, 0xF6, "MSPM0G3107SRGER"),
    (0x3107, 0xF7, "MSPM0G3107SRGZR"),
    (0x3505, 0xF6, "MSPM0G3505SRGER"),
    (0x3505, 0xF7, "MSPM0G3505SRGZR"),
    (0x3506, 0xF6, "MSPM0G3506SRGER"),
    (0x3506, 0xF7, "MSPM0G3506SRGZR"),
    (0x3515, 0xF6, "MSPM0G3515SRGER"),
    (0x3515, 0xF7, "MSPM0G3515SRGZR"),
    (0x3516, 0xF6, "MSPM0G3516SRGER"),
    (0x3516, 0xF7, "MSPM0G3516SRGZR"),
    (0x3519, 0xF6, "MSPM0G3519SRGER"),
    (0x3519, 0xF7, "MSPM0G3519SRGZR"),
    (0xAE2D, 0xF6, "MSPM0G3507SRGER"),
    (0xAE2D, 0xF7, "MSPM0G3507SRGZR"),
]);

/// The MSPM0L family table.
pub static MSPM0L_FAMILY: Family = Family {
    family_id: MSPM0L_FAMILY_ID,
    generic_name: "MSPM0L",
    parts: MSPM0L_PARTS,
};

/// The MSPM0G family table.
pub static MSPM0G_FAMILY: Family = Family {
    family_id: MSPM0G_FAMILY_ID,
    generic_name: "MSPM0G",
    parts: MSPM0G_PARTS,
};

/// Resolves `family_id` (`DID.PART_NUM`) to one of the known families.
pub fn family_for(family_id: u32) -> Option<&'static Family> {
    match family_id {
        MSPM0L_FAMILY_ID => Some(&MSPM0L_FAMILY),
        MSPM0G_FAMILY_ID => Some(&MSPM0G_FAMILY),
        _ => None,
    }
}

/// Resolves a full chip name from family, part and variant IDs.
///
/// Never indexes a part table with a "not found" sentinel: on a known
/// family with an unrecognized part, this always falls through to the
/// family's generic name instead of panicking or returning a bogus name.
pub fn identify(family_id: u32, part_id: u32, variant_id: u32) -> Option<IdentifiedChip> {
    let family = family_for(family_id)?;
    match family.lookup(part_id, variant_id) {
        Some(name) => Some(IdentifiedChip {
            name,
            exact_match: true,
        }),
        None => Some(IdentifiedChip {
            name: family.generic_name,
            exact_match: false,
        }),
    }
}

/// The result of resolving a family/part/variant triple.
#[derive(Debug, Clone, Copy)]
pub struct IdentifiedChip {
    /// The chip name to report: an exact part name, or the family's
    /// generic name on a part-level miss.
    pub name: &'static str,
    /// Whether `name` is an exact part match (`false` means "warn and
    /// proceed under the family's generic name").
    pub exact_match: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn exact_part_match() {
        let chip = identify(MSPM0G_FAMILY_ID, 0xAE2D, 0xF7).unwrap();
        assert_eq!(chip.name, "MSPM0G3507SRGZR");
        assert!(chip.exact_match);
    }

    #[test]
    fn known_family_unknown_part_falls_back() {
        let chip = identify(MSPM0L_FAMILY_ID, 0x0000, 0x00).unwrap();
        assert_eq!(chip.name, "MSPM0L");
        assert!(!chip.exact_match);
    }

    #[test]
    fn unknown_family_is_none() {
        assert!(identify(0xDEAD, 0, 0).is_none());
    }

    #[test]
    fn part_tables_are_sorted() {
        for table in [MSPM0L_PARTS, MSPM0G_PARTS] {
            for pair in table.windows(2) {
                let a = (pair[0].part_id, pair[0].variant_id);
                let b = (pair[1].part_id, pair[1].variant_id);
                assert!(a < b, "table not sorted at {a:?} / {b:?}");
            }
        }
    }
}
