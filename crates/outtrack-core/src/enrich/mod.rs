//! Snapshot enrichment: derives location fields from encoded geometry.
//!
//! Enrichment never changes an outage's identity key, which is derived from
//! the raw encoded strings, not from the coordinates written here.

pub mod places;
pub mod polyline;

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::model::RawOutage;

pub use places::{GeoJsonPlaces, PlacesError};
pub use polyline::PolylineError;

/// Errors raised while enriching a snapshot. Any error aborts the snapshot.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    /// An encoded position could not be decoded.
    #[error("decoding geom.p {encoded:?} of outage {outage_id:?}: {source}")]
    InvalidPosition {
        outage_id: String,
        encoded: String,
        #[source]
        source: PolylineError,
    },

    /// The place index failed.
    #[error("place lookup failed: {0}")]
    PlaceLookup(String),
}

/// Attaches derived attributes to every outage in a snapshot.
pub trait SnapshotEnricher {
    /// Enrich `outages` in place.
    ///
    /// # Errors
    ///
    /// Returns an error when any record cannot be enriched.
    fn enrich(&mut self, outages: &mut [RawOutage]) -> Result<(), EnrichError>;
}

/// Enricher that leaves snapshots untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEnrichment;

impl SnapshotEnricher for NoEnrichment {
    fn enrich(&mut self, _outages: &mut [RawOutage]) -> Result<(), EnrichError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Places
// ---------------------------------------------------------------------------

/// Kind of administrative area a place represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceKind {
    County,
    Neighbourhood,
    Other,
}

/// A named area containing a point.
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub name: String,
    pub kind: PlaceKind,
    /// Planar area, used to prefer the smallest matching neighbourhood.
    pub area: f64,
}

/// Point-in-area lookup capability. Implementations own their geometry.
pub trait PlaceIndex {
    /// Every place containing `(lon, lat)`.
    ///
    /// # Errors
    ///
    /// Returns [`EnrichError::PlaceLookup`] if the index cannot be queried.
    fn places_containing(&self, lon: f64, lat: f64) -> Result<Vec<Place>, EnrichError>;
}

/// Index with no places: positions are decoded, names stay empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPlaces;

impl PlaceIndex for NoPlaces {
    fn places_containing(&self, _lon: f64, _lat: f64) -> Result<Vec<Place>, EnrichError> {
        Ok(Vec::new())
    }
}

/// Default number of distinct positions the placer remembers.
pub const DEFAULT_PLACE_CACHE_CAPACITY: usize = 4096;

/// Cache hit/miss counters for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Decodes each outage's first position into `lon`/`lat` and names the
/// county and smallest neighbourhood containing it.
///
/// Lookups are memoised per exact coordinate in a bounded LRU cache.
pub struct Placer<I> {
    index: I,
    cache: LruCache<(u64, u64), Arc<[Place]>>,
    stats: CacheStats,
}

impl<I: PlaceIndex> Placer<I> {
    pub fn new(index: I, capacity: NonZeroUsize) -> Self {
        Self {
            index,
            cache: LruCache::new(capacity),
            stats: CacheStats::default(),
        }
    }

    #[must_use]
    pub const fn stats(&self) -> CacheStats {
        self.stats
    }

    #[must_use]
    pub fn cached_positions(&self) -> usize {
        self.cache.len()
    }

    fn places_at(&mut self, lon: f64, lat: f64) -> Result<Arc<[Place]>, EnrichError> {
        let key = (lon.to_bits(), lat.to_bits());
        if let Some(places) = self.cache.get(&key) {
            self.stats.hits += 1;
            return Ok(Arc::clone(places));
        }
        self.stats.misses += 1;
        let places: Arc<[Place]> = self.index.places_containing(lon, lat)?.into();
        self.cache.put(key, Arc::clone(&places));
        Ok(places)
    }
}

impl<I: PlaceIndex> SnapshotEnricher for Placer<I> {
    fn enrich(&mut self, outages: &mut [RawOutage]) -> Result<(), EnrichError> {
        for outage in outages.iter_mut() {
            let Some(encoded) = outage.geom.encoded_position() else {
                continue;
            };
            let (lat, lon) =
                polyline::decode_first(encoded).map_err(|source| EnrichError::InvalidPosition {
                    outage_id: outage.id.clone(),
                    encoded: encoded.to_string(),
                    source,
                })?;

            let places = self.places_at(lon, lat)?;

            let county = places
                .iter()
                .find(|place| place.kind == PlaceKind::County)
                .map(|place| place.name.clone());
            let neighborhood = places
                .iter()
                .filter(|place| place.kind == PlaceKind::Neighbourhood)
                .min_by(|a, b| a.area.total_cmp(&b.area))
                .map(|place| place.name.clone());

            outage.geom.lon = Some(lon);
            outage.geom.lat = Some(lat);
            outage.geom.county = county;
            outage.geom.neighborhood = neighborhood;
        }
        Ok(())
    }
}
