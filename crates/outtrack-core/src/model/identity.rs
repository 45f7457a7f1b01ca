//! Identity keys: how one outage is recognised across snapshots.
//!
//! The publisher's `id` is recycled, so sameness is decided by geometry.
//! The raw encoded strings are preferred over decoded coordinates because a
//! float that went through decode/encode is not guaranteed to come back
//! bit-identical.

use std::fmt;
use std::str::FromStr;

use super::outage::OutageGeom;

/// Key matching the same real-world outage across snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityKey {
    /// First encoded position string (`geom.p[0]`).
    Position(String),
    /// First encoded area outline (`geom.a[0]`), used when no position exists.
    Area(String),
    /// Exact bit patterns of already-decoded coordinates.
    Coordinates { lon_bits: u64, lat_bits: u64 },
}

impl IdentityKey {
    /// Derive the key from the most granular descriptor available.
    ///
    /// Returns `None` when the record carries no geometry at all.
    #[must_use]
    pub fn derive(geom: &OutageGeom) -> Option<Self> {
        if let Some(p) = geom.encoded_position() {
            return Some(Self::Position(p.to_string()));
        }
        if let Some(a) = geom.encoded_area() {
            return Some(Self::Area(a.to_string()));
        }
        match (geom.lon, geom.lat) {
            (Some(lon), Some(lat)) => Some(Self::Coordinates {
                lon_bits: lon.to_bits(),
                lat_bits: lat.to_bits(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position(p) => write!(f, "p:{p}"),
            Self::Area(a) => write!(f, "a:{a}"),
            Self::Coordinates { lon_bits, lat_bits } => write!(
                f,
                "ll:{},{}",
                f64::from_bits(*lon_bits),
                f64::from_bits(*lat_bits)
            ),
        }
    }
}

/// A stored identity key that is not in [`IdentityKey`]'s display form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed identity key {0:?}")]
pub struct ParseIdentityKeyError(pub String);

impl FromStr for IdentityKey {
    type Err = ParseIdentityKeyError;

    /// Inverse of `Display`. Coordinates are printed in Rust's shortest
    /// round-trip form, so parsing restores the exact bits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseIdentityKeyError(s.to_string());
        let (tag, body) = s.split_once(':').ok_or_else(malformed)?;
        if body.is_empty() {
            return Err(malformed());
        }
        match tag {
            "p" => Ok(Self::Position(body.to_string())),
            "a" => Ok(Self::Area(body.to_string())),
            "ll" => {
                let (lon, lat) = body.split_once(',').ok_or_else(malformed)?;
                let lon: f64 = lon.parse().map_err(|_| malformed())?;
                let lat: f64 = lat.parse().map_err(|_| malformed())?;
                Ok(Self::Coordinates {
                    lon_bits: lon.to_bits(),
                    lat_bits: lat.to_bits(),
                })
            }
            _ => Err(malformed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom() -> OutageGeom {
        OutageGeom::default()
    }

    #[test]
    fn position_wins_over_everything() {
        let g = OutageGeom {
            p: vec!["q{nuGb_fyJ".into()],
            a: vec!["outline".into()],
            lon: Some(-63.1),
            lat: Some(45.0),
            ..geom()
        };
        assert_eq!(
            IdentityKey::derive(&g),
            Some(IdentityKey::Position("q{nuGb_fyJ".into()))
        );
    }

    #[test]
    fn area_used_without_position() {
        let g = OutageGeom {
            a: vec!["outline".into()],
            ..geom()
        };
        assert_eq!(
            IdentityKey::derive(&g),
            Some(IdentityKey::Area("outline".into()))
        );
    }

    #[test]
    fn coordinates_are_last_resort() {
        let g = OutageGeom {
            lon: Some(-63.12565),
            lat: Some(45.04342),
            ..geom()
        };
        let key = IdentityKey::derive(&g).expect("key");
        assert_eq!(key.to_string(), "ll:-63.12565,45.04342");
    }

    #[test]
    fn enrichment_does_not_change_position_key() {
        let bare = OutageGeom {
            p: vec!["wchyGv|vmJ".into()],
            ..geom()
        };
        let enriched = OutageGeom {
            lon: Some(-63.5),
            lat: Some(44.6),
            county: Some("Halifax".into()),
            ..bare.clone()
        };
        assert_eq!(IdentityKey::derive(&bare), IdentityKey::derive(&enriched));
    }

    #[test]
    fn empty_geometry_has_no_key() {
        assert_eq!(IdentityKey::derive(&geom()), None);
        let blank = OutageGeom {
            p: vec![String::new()],
            ..geom()
        };
        assert_eq!(IdentityKey::derive(&blank), None);
    }

    #[test]
    fn display_form_parses_back() {
        let keys = [
            IdentityKey::Position("_p~iF~ps|U".into()),
            IdentityKey::Position("a:b,c".into()),
            IdentityKey::Area("}~kvHnqs`@??".into()),
        ];
        for key in keys {
            assert_eq!(key.to_string().parse::<IdentityKey>(), Ok(key));
        }
    }

    #[test]
    fn coordinate_keys_parse_back_bit_exact() {
        let values = [
            -116.833_615_548_096_13,
            44.5,
            -0.0,
            f64::MIN_POSITIVE,
            5e-324,
            0.1 + 0.2,
            f64::MAX,
        ];
        for &lon in &values {
            for &lat in &values {
                let key = IdentityKey::Coordinates {
                    lon_bits: lon.to_bits(),
                    lat_bits: lat.to_bits(),
                };
                assert_eq!(key.to_string().parse::<IdentityKey>(), Ok(key));
            }
        }
    }

    #[test]
    fn malformed_keys_are_rejected() {
        for raw in ["", "p:", "x:abc", "ll:1.0", "ll:abc,1.0", "no-tag"] {
            assert!(raw.parse::<IdentityKey>().is_err(), "{raw:?}");
        }
    }
}
