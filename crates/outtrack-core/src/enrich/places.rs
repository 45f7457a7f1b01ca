//! Place index read from a GeoJSON `FeatureCollection`.
//!
//! Features follow the Who's On First conventions: `wof:name` names the
//! place and `wof:placetype` is `county`, `neighbourhood` or anything else.
//! Point, Polygon and MultiPolygon geometries are supported; containment and
//! area are planar, in degrees.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{EnrichError, Place, PlaceIndex, PlaceKind};

/// Failure loading a places file.
#[derive(Debug, thiserror::Error)]
pub enum PlacesError {
    #[error("reading places file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing places file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("feature {index} has malformed {kind} coordinates: {source}")]
    Geometry {
        index: usize,
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

type Ring = Vec<[f64; 2]>;

#[derive(Debug, Clone, PartialEq)]
enum Shape {
    Point([f64; 2]),
    /// Outer ring first, then holes.
    Polygons(Vec<Vec<Ring>>),
}

impl Shape {
    fn contains(&self, lon: f64, lat: f64) -> bool {
        match self {
            Self::Point([x, y]) => x.to_bits() == lon.to_bits() && y.to_bits() == lat.to_bits(),
            Self::Polygons(polygons) => polygons.iter().any(|rings| {
                let mut rings = rings.iter();
                rings
                    .next()
                    .is_some_and(|outer| ring_contains(outer, lon, lat))
                    && !rings.any(|hole| ring_contains(hole, lon, lat))
            }),
        }
    }

    fn area(&self) -> f64 {
        match self {
            Self::Point(_) => 0.0,
            Self::Polygons(polygons) => polygons
                .iter()
                .map(|rings| {
                    let mut rings = rings.iter();
                    let outer = rings.next().map_or(0.0, |ring| ring_area(ring));
                    outer - rings.map(|ring| ring_area(ring)).sum::<f64>()
                })
                .sum(),
        }
    }
}

/// Even-odd ray cast towards +x.
fn ring_contains(ring: &[[f64; 2]], lon: f64, lat: f64) -> bool {
    let Some(&last) = ring.last() else {
        return false;
    };
    let mut inside = false;
    let mut prev = last;
    for &[x, y] in ring {
        let [px, py] = prev;
        if (y > lat) != (py > lat) && lon < (px - x).mul_add((lat - y) / (py - y), x) {
            inside = !inside;
        }
        prev = [x, y];
    }
    inside
}

/// Absolute shoelace area.
fn ring_area(ring: &[[f64; 2]]) -> f64 {
    let Some(&last) = ring.last() else {
        return 0.0;
    };
    let mut prev = last;
    let mut twice = 0.0;
    for &[x, y] in ring {
        twice += prev[0].mul_add(y, -(x * prev[1]));
        prev = [x, y];
    }
    (twice / 2.0).abs()
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    #[serde(default)]
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Value,
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    place: Place,
    shape: Shape,
}

/// Places with their outlines, searched linearly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoJsonPlaces {
    entries: Vec<Entry>,
}

impl GeoJsonPlaces {
    /// Read a `FeatureCollection` from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid GeoJSON.
    pub fn load(path: &Path) -> Result<Self, PlacesError> {
        let bytes = std::fs::read(path).map_err(|source| PlacesError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let collection: FeatureCollection =
            serde_json::from_slice(&bytes).map_err(|source| PlacesError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let places = Self::from_features(collection.features)?;
        tracing::debug!(path = %path.display(), places = places.len(), "loaded places");
        Ok(places)
    }

    /// Parse a `FeatureCollection` held in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not valid GeoJSON.
    pub fn from_json(json: &str) -> Result<Self, PlacesError> {
        let collection: FeatureCollection =
            serde_json::from_str(json).map_err(|source| PlacesError::Parse {
                path: PathBuf::new(),
                source,
            })?;
        Self::from_features(collection.features)
    }

    fn from_features(features: Vec<Feature>) -> Result<Self, PlacesError> {
        let mut entries = Vec::with_capacity(features.len());
        for (index, feature) in features.into_iter().enumerate() {
            let props = feature.properties.unwrap_or_default();
            let Some(name) = props.get("wof:name").and_then(Value::as_str) else {
                continue;
            };
            let kind = match props.get("wof:placetype").and_then(Value::as_str) {
                Some("county") => PlaceKind::County,
                Some("neighbourhood") => PlaceKind::Neighbourhood,
                _ => PlaceKind::Other,
            };
            let Some(shape) = feature
                .geometry
                .map(|geometry| shape_of(index, geometry))
                .transpose()?
                .flatten()
            else {
                continue;
            };
            entries.push(Entry {
                place: Place {
                    name: name.to_string(),
                    kind,
                    area: shape.area(),
                },
                shape,
            });
        }
        Ok(Self { entries })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn shape_of(index: usize, geometry: Geometry) -> Result<Option<Shape>, PlacesError> {
    let Geometry { kind, coordinates } = geometry;
    let malformed = |source| PlacesError::Geometry {
        index,
        kind: kind.clone(),
        source,
    };
    let shape = match kind.as_str() {
        "Point" => Shape::Point(serde_json::from_value(coordinates).map_err(malformed)?),
        "Polygon" => Shape::Polygons(vec![
            serde_json::from_value(coordinates).map_err(malformed)?,
        ]),
        "MultiPolygon" => Shape::Polygons(serde_json::from_value(coordinates).map_err(malformed)?),
        _ => return Ok(None),
    };
    Ok(Some(shape))
}

impl PlaceIndex for GeoJsonPlaces {
    fn places_containing(&self, lon: f64, lat: f64) -> Result<Vec<Place>, EnrichError> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.shape.contains(lon, lat))
            .map(|entry| entry.place.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLECTION: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"wof:name": "Halifax", "wof:placetype": "county"},
                "geometry": {"type": "Polygon", "coordinates": [
                    [[-64.0, 44.0], [-63.0, 44.0], [-63.0, 45.0], [-64.0, 45.0], [-64.0, 44.0]],
                    [[-63.2, 44.8], [-63.1, 44.8], [-63.1, 44.9], [-63.2, 44.9], [-63.2, 44.8]]
                ]}
            },
            {
                "type": "Feature",
                "properties": {"wof:name": "Downtown", "wof:placetype": "neighbourhood"},
                "geometry": {"type": "MultiPolygon", "coordinates": [
                    [[[-63.6, 44.6], [-63.5, 44.6], [-63.5, 44.7], [-63.6, 44.7], [-63.6, 44.6]]]
                ]}
            },
            {
                "type": "Feature",
                "properties": {"wof:name": "Landmark", "wof:placetype": "venue"},
                "geometry": {"type": "Point", "coordinates": [-63.55, 44.65]}
            },
            {
                "type": "Feature",
                "properties": {"wof:placetype": "county"},
                "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}
            },
            {
                "type": "Feature",
                "properties": {"wof:name": "Trail", "wof:placetype": "venue"},
                "geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]}
            }
        ]
    }"#;

    fn names(places: &GeoJsonPlaces, lon: f64, lat: f64) -> Vec<String> {
        places
            .places_containing(lon, lat)
            .expect("lookup")
            .into_iter()
            .map(|place| place.name)
            .collect()
    }

    #[test]
    fn unnamed_and_unsupported_features_are_skipped() {
        let places = GeoJsonPlaces::from_json(COLLECTION).expect("parse");
        assert_eq!(places.len(), 3);
    }

    #[test]
    fn finds_every_containing_place() {
        let places = GeoJsonPlaces::from_json(COLLECTION).expect("parse");
        assert_eq!(names(&places, -63.55, 44.65), ["Halifax", "Downtown", "Landmark"]);
        assert_eq!(names(&places, -63.9, 44.1), ["Halifax"]);
        assert!(names(&places, -62.0, 44.5).is_empty());
    }

    #[test]
    fn holes_are_outside() {
        let places = GeoJsonPlaces::from_json(COLLECTION).expect("parse");
        assert!(names(&places, -63.15, 44.85).is_empty());
    }

    #[test]
    fn area_excludes_holes() {
        let places = GeoJsonPlaces::from_json(COLLECTION).expect("parse");
        let county = places
            .places_containing(-63.9, 44.1)
            .expect("lookup")
            .remove(0);
        assert_eq!(county.kind, PlaceKind::County);
        assert!((county.area - 0.99).abs() < 1e-9, "area {}", county.area);
    }

    #[test]
    fn malformed_coordinates_are_reported() {
        let bad = r#"{"features": [{
            "properties": {"wof:name": "Broken"},
            "geometry": {"type": "Polygon", "coordinates": [1, 2]}
        }]}"#;
        assert!(matches!(
            GeoJsonPlaces::from_json(bad),
            Err(PlacesError::Geometry { index: 0, .. })
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            GeoJsonPlaces::load(&dir.path().join("nope.geojson")),
            Err(PlacesError::Read { .. })
        ));
    }
}
