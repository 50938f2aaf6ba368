use crate::{GeometryError, Organization};

/// Bursts fetched per column access by the HBM3 core.
const INTERNAL_PREFETCH: u64 = 8;

struct Preset {
    name: &'static str,
    /// Density of a single channel in Mb.
    #[cfg_attr(not(test), allow(dead_code))]
    density: u64,
    /// DQ pins per pseudo channel.
    dq: u64,
    pseudo_channels: u64,
    ranks: u64,
    bank_groups: u64,
    banks: u64,
    rows: u64,
    columns: u64,
}

// 1/2/3/4R means 1/2/3/4 ranks for 4/8/12/16-Hi stack (JESD238A).
#[rustfmt::skip]
const HBM3: &[Preset] = &[
    Preset { name: "HBM3_2Gb_1R",  density: 2 << 10,  dq: 32, pseudo_channels: 2, ranks: 1, bank_groups: 4, banks: 4, rows: 1 << 13, columns: 1 << 5 },
    Preset { name: "HBM3_4Gb_1R",  density: 4 << 10,  dq: 32, pseudo_channels: 2, ranks: 1, bank_groups: 4, banks: 4, rows: 1 << 14, columns: 1 << 5 },
    Preset { name: "HBM3_8Gb_1R",  density: 8 << 10,  dq: 32, pseudo_channels: 2, ranks: 1, bank_groups: 4, banks: 4, rows: 1 << 15, columns: 1 << 5 },
    Preset { name: "HBM3_4Gb_2R",  density: 4 << 10,  dq: 32, pseudo_channels: 2, ranks: 2, bank_groups: 4, banks: 4, rows: 1 << 13, columns: 1 << 5 },
    Preset { name: "HBM3_8Gb_2R",  density: 8 << 10,  dq: 32, pseudo_channels: 2, ranks: 2, bank_groups: 4, banks: 4, rows: 1 << 14, columns: 1 << 5 },
    Preset { name: "HBM3_16Gb_2R", density: 16 << 10, dq: 32, pseudo_channels: 2, ranks: 2, bank_groups: 4, banks: 4, rows: 1 << 15, columns: 1 << 5 },
    Preset { name: "HBM3_6Gb_3R",  density: 6 << 10,  dq: 32, pseudo_channels: 2, ranks: 3, bank_groups: 4, banks: 4, rows: 1 << 13, columns: 1 << 5 },
    Preset { name: "HBM3_12Gb_3R", density: 12 << 10, dq: 32, pseudo_channels: 2, ranks: 3, bank_groups: 4, banks: 4, rows: 1 << 14, columns: 1 << 5 },
    Preset { name: "HBM3_24Gb_3R", density: 24 << 10, dq: 32, pseudo_channels: 2, ranks: 3, bank_groups: 4, banks: 4, rows: 1 << 15, columns: 1 << 5 },
    Preset { name: "HBM3_8Gb_4R",  density: 8 << 10,  dq: 32, pseudo_channels: 2, ranks: 4, bank_groups: 4, banks: 4, rows: 1 << 13, columns: 1 << 5 },
    Preset { name: "HBM3_16Gb_4R", density: 16 << 10, dq: 32, pseudo_channels: 2, ranks: 4, bank_groups: 4, banks: 4, rows: 1 << 14, columns: 1 << 5 },
    Preset { name: "HBM3_32Gb_4R", density: 32 << 10, dq: 32, pseudo_channels: 2, ranks: 4, bank_groups: 4, banks: 4, rows: 1 << 15, columns: 1 << 5 },
];

/// Names accepted by [`Organization::hbm3_preset`], in table order.
pub fn preset_names() -> impl Iterator<Item = &'static str> {
    HBM3.iter().map(|p| p.name)
}

impl Organization {
    /// Organization of `channels` channels of a named HBM3 preset.
    ///
    /// Column granularity is the bytes delivered by one internally prefetched burst on a pseudo
    /// channel's DQ pins.
    pub fn hbm3_preset(name: &str, channels: u64) -> Result<Self, GeometryError> {
        let preset = HBM3
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| GeometryError::UnknownPreset(name.to_string()))?;

        Ok(Organization {
            channels,
            pseudo_channels: preset.pseudo_channels,
            ranks: preset.ranks,
            bank_groups: preset.bank_groups,
            banks: preset.banks,
            rows: preset.rows,
            columns: preset.columns,
            granularity: preset.dq * INTERNAL_PREFETCH / 8,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{Geometry, Level, Organization};

    use super::*;

    #[test]
    fn every_name_builds_its_preset() {
        let names: Vec<_> = preset_names().collect();
        assert_eq!(names.len(), 12);
        assert_eq!(names[4], "HBM3_8Gb_2R");
        for name in names {
            let org = Organization::hbm3_preset(name, 16).unwrap();
            assert_eq!(org.channels, 16, "{name}");
            assert_eq!(org.granularity, 32, "{name}");
        }
    }

    #[test]
    fn default_is_hbm3_8gb_2r() {
        assert_eq!(
            Organization::hbm3_preset("HBM3_8Gb_2R", 16).unwrap(),
            Organization::default()
        );
    }

    #[test]
    fn channel_capacity_matches_density() {
        for preset in HBM3 {
            let org = Organization::hbm3_preset(preset.name, 1).unwrap();
            let bits = Geometry::new(org).unwrap().stride(Level::Channel) * 8;
            assert_eq!(bits, preset.density << 20, "{}", preset.name);
        }
    }

    #[test]
    fn unknown_preset() {
        assert_eq!(
            Organization::hbm3_preset("HBM2_8Gb", 8),
            Err(GeometryError::UnknownPreset("HBM2_8Gb".to_string()))
        );
    }
}
