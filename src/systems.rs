// # System Classifier
//
// Canonical system enumeration plus bidirectional external-ID tables for
// every catalog backend. Pure lookup tables, no I/O. Unknown external ids
// map to `None`, never to a wrong canonical value: guessing here risks
// silently mis-cataloging content under the wrong system.

use serde::{Deserialize, Serialize};

/// Canonical internal system identifier, independent of any external
/// catalog's numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemId {
    Nes,
    Snes,
    Nintendo64,
    GameBoy,
    GameBoyColor,
    GameBoyAdvance,
    VirtualBoy,
    PokemonMini,
    MasterSystem,
    Genesis,
    SegaCd,
    Sega32X,
    GameGear,
    PlayStation,
    Atari2600,
    Atari7800,
    Lynx,
    TurboGrafx16,
    NeoGeoPocket,
    WonderSwan,
}

/// External catalog backends with their own system numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalCatalog {
    OpenVgdb,
    GamesDb,
}

impl SystemId {
    pub const ALL: [SystemId; 20] = [
        SystemId::Nes,
        SystemId::Snes,
        SystemId::Nintendo64,
        SystemId::GameBoy,
        SystemId::GameBoyColor,
        SystemId::GameBoyAdvance,
        SystemId::VirtualBoy,
        SystemId::PokemonMini,
        SystemId::MasterSystem,
        SystemId::Genesis,
        SystemId::SegaCd,
        SystemId::Sega32X,
        SystemId::GameGear,
        SystemId::PlayStation,
        SystemId::Atari2600,
        SystemId::Atari7800,
        SystemId::Lynx,
        SystemId::TurboGrafx16,
        SystemId::NeoGeoPocket,
        SystemId::WonderSwan,
    ];

    /// Stable string form used in database rows and managed storage paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemId::Nes => "nes",
            SystemId::Snes => "snes",
            SystemId::Nintendo64 => "n64",
            SystemId::GameBoy => "gb",
            SystemId::GameBoyColor => "gbc",
            SystemId::GameBoyAdvance => "gba",
            SystemId::VirtualBoy => "vb",
            SystemId::PokemonMini => "pokemini",
            SystemId::MasterSystem => "sms",
            SystemId::Genesis => "genesis",
            SystemId::SegaCd => "segacd",
            SystemId::Sega32X => "sega32x",
            SystemId::GameGear => "gamegear",
            SystemId::PlayStation => "psx",
            SystemId::Atari2600 => "atari2600",
            SystemId::Atari7800 => "atari7800",
            SystemId::Lynx => "lynx",
            SystemId::TurboGrafx16 => "tg16",
            SystemId::NeoGeoPocket => "ngp",
            SystemId::WonderSwan => "wonderswan",
        }
    }

    /// Parse the stable string form back into a canonical id.
    pub fn from_str(value: &str) -> Option<SystemId> {
        SystemId::ALL.iter().copied().find(|s| s.as_str() == value)
    }
}

/// Map a backend's external system id to the canonical id.
pub fn canonical_from_external(backend: ExternalCatalog, external_id: i64) -> Option<SystemId> {
    SystemId::ALL
        .iter()
        .copied()
        .find(|s| external_id_for(*s, backend) == Some(external_id))
}

/// Map a canonical id to a backend's external system id.
pub fn external_id_for(system: SystemId, backend: ExternalCatalog) -> Option<i64> {
    match backend {
        ExternalCatalog::OpenVgdb => Some(match system {
            SystemId::Nes => 22,
            SystemId::Snes => 30,
            SystemId::Nintendo64 => 21,
            SystemId::GameBoy => 19,
            SystemId::GameBoyColor => 20,
            SystemId::GameBoyAdvance => 18,
            SystemId::VirtualBoy => 32,
            SystemId::PokemonMini => 24,
            SystemId::MasterSystem => 27,
            SystemId::Genesis => 26,
            SystemId::SegaCd => 25,
            SystemId::Sega32X => 28,
            SystemId::GameGear => 29,
            SystemId::PlayStation => 38,
            SystemId::Atari2600 => 3,
            SystemId::Atari7800 => 5,
            SystemId::Lynx => 4,
            SystemId::TurboGrafx16 => 23,
            SystemId::NeoGeoPocket => 35,
            SystemId::WonderSwan => 36,
        }),
        ExternalCatalog::GamesDb => Some(match system {
            SystemId::Nes => 7,
            SystemId::Snes => 6,
            SystemId::Nintendo64 => 3,
            SystemId::GameBoy => 4,
            SystemId::GameBoyColor => 41,
            SystemId::GameBoyAdvance => 5,
            SystemId::VirtualBoy => 4918,
            SystemId::PokemonMini => 4957,
            SystemId::MasterSystem => 35,
            SystemId::Genesis => 18,
            SystemId::SegaCd => 21,
            SystemId::Sega32X => 33,
            SystemId::GameGear => 20,
            SystemId::PlayStation => 10,
            SystemId::Atari2600 => 22,
            SystemId::Atari7800 => 27,
            SystemId::Lynx => 4924,
            SystemId::TurboGrafx16 => 34,
            SystemId::NeoGeoPocket => 4922,
            SystemId::WonderSwan => 4925,
        }),
    }
}

/// Candidate systems for a ROM file extension (lowercase, no dot).
///
/// Some extensions are ambiguous (`bin` in particular) which is why fuzzy
/// filename matching only runs when the extension narrows to one system or
/// the caller supplied an explicit hint.
pub fn systems_for_extension(extension: &str) -> &'static [SystemId] {
    match extension {
        "nes" | "fds" => &[SystemId::Nes],
        "smc" | "sfc" => &[SystemId::Snes],
        "n64" | "z64" | "v64" => &[SystemId::Nintendo64],
        "gb" => &[SystemId::GameBoy],
        "gbc" => &[SystemId::GameBoyColor],
        "gba" => &[SystemId::GameBoyAdvance],
        "vb" => &[SystemId::VirtualBoy],
        "min" => &[SystemId::PokemonMini],
        "sms" => &[SystemId::MasterSystem],
        "md" | "gen" | "smd" => &[SystemId::Genesis],
        "32x" => &[SystemId::Sega32X],
        "gg" => &[SystemId::GameGear],
        "a26" => &[SystemId::Atari2600],
        "a78" => &[SystemId::Atari7800],
        "lnx" => &[SystemId::Lynx],
        "pce" => &[SystemId::TurboGrafx16],
        "ngp" | "ngc" => &[SystemId::NeoGeoPocket],
        "ws" | "wsc" => &[SystemId::WonderSwan],
        "bin" => &[
            SystemId::Genesis,
            SystemId::PlayStation,
            SystemId::SegaCd,
            SystemId::Atari2600,
        ],
        "iso" | "img" | "cue" => &[SystemId::PlayStation, SystemId::SegaCd],
        _ => &[],
    }
}

/// Header length to skip for the headerless CRC, by extension.
pub fn header_skip_for_extension(extension: &str) -> Option<u64> {
    match extension {
        "nes" | "fds" => Some(16),
        "lnx" => Some(64),
        "a78" => Some(128),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const CATALOGS: [ExternalCatalog; 2] = [ExternalCatalog::OpenVgdb, ExternalCatalog::GamesDb];

    #[test]
    fn external_ids_round_trip_for_every_system() {
        for catalog in CATALOGS {
            for system in SystemId::ALL {
                let external = external_id_for(system, catalog).unwrap();
                assert_eq!(
                    canonical_from_external(catalog, external),
                    Some(system),
                    "round trip failed for {:?} via {:?}",
                    system,
                    catalog
                );
            }
        }
    }

    #[test]
    fn external_ids_are_injective_per_catalog() {
        for catalog in CATALOGS {
            let mut seen = HashSet::new();
            for system in SystemId::ALL {
                let external = external_id_for(system, catalog).unwrap();
                assert!(seen.insert(external), "duplicate external id {}", external);
            }
            seen.clear();
        }
    }

    #[test]
    fn unknown_external_id_maps_to_none() {
        for catalog in CATALOGS {
            assert_eq!(canonical_from_external(catalog, 999_999), None);
            assert_eq!(canonical_from_external(catalog, -1), None);
        }
    }

    #[test]
    fn string_form_round_trips() {
        for system in SystemId::ALL {
            assert_eq!(SystemId::from_str(system.as_str()), Some(system));
        }
        assert_eq!(SystemId::from_str("amiga"), None);
    }

    #[test]
    fn extension_map_is_scoped() {
        assert_eq!(systems_for_extension("sfc"), &[SystemId::Snes]);
        assert_eq!(systems_for_extension("xyz"), &[] as &[SystemId]);
        assert!(systems_for_extension("bin").len() > 1);
    }

    #[test]
    fn header_skip_known_extensions() {
        assert_eq!(header_skip_for_extension("nes"), Some(16));
        assert_eq!(header_skip_for_extension("sfc"), None);
    }
}
