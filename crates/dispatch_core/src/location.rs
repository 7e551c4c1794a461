//! Fast location store: last known position of every moving unit.
//!
//! Written every tick by the movement advancer and read in one batch by the
//! matcher and the snapshot broadcaster. Entries are never written back to the
//! authoritative store here; the arrival handler reconciles them.

use std::collections::HashMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::model::UnitId;
use crate::spatial::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub lat: f64,
    pub lon: f64,
    /// Epoch ms of the write.
    pub updated_at: u64,
}

impl LocationRecord {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }

    /// Whether the record is older than `max_age_ms` at `now_ms`.
    pub fn is_stale(&self, now_ms: u64, max_age_ms: Option<u64>) -> bool {
        match max_age_ms {
            Some(max_age) => now_ms.saturating_sub(self.updated_at) > max_age,
            None => false,
        }
    }
}

pub trait LocationStore: Send + Sync {
    fn put(&self, unit_id: UnitId, position: GeoPoint, updated_at: u64);
    fn get(&self, unit_id: UnitId) -> Option<LocationRecord>;
    /// Snapshot of every entry in a single batched read.
    fn get_all(&self) -> HashMap<UnitId, LocationRecord>;
}

#[derive(Debug, Default)]
pub struct InMemoryLocationStore {
    entries: DashMap<UnitId, LocationRecord>,
}

impl InMemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LocationStore for InMemoryLocationStore {
    fn put(&self, unit_id: UnitId, position: GeoPoint, updated_at: u64) {
        self.entries.insert(
            unit_id,
            LocationRecord {
                lat: position.lat,
                lon: position.lon,
                updated_at,
            },
        );
    }

    fn get(&self, unit_id: UnitId) -> Option<LocationRecord> {
        self.entries.get(&unit_id).map(|entry| *entry.value())
    }

    fn get_all(&self) -> HashMap<UnitId, LocationRecord> {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_overwrites_previous_entry() {
        let store = InMemoryLocationStore::new();
        store.put(UnitId(1), GeoPoint::new(36.1, -115.1), 10);
        store.put(UnitId(1), GeoPoint::new(36.2, -115.2), 20);
        let record = store.get(UnitId(1)).expect("record");
        assert_eq!(record.point(), GeoPoint::new(36.2, -115.2));
        assert_eq!(record.updated_at, 20);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn get_all_returns_every_unit() {
        let store = InMemoryLocationStore::new();
        store.put(UnitId(1), GeoPoint::new(36.1, -115.1), 10);
        store.put(UnitId(2), GeoPoint::new(36.2, -115.2), 10);
        let all = store.get_all();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key(&UnitId(2)));
    }

    #[test]
    fn staleness_only_applies_with_max_age() {
        let record = LocationRecord {
            lat: 0.0,
            lon: 0.0,
            updated_at: 1_000,
        };
        assert!(!record.is_stale(1_000_000, None));
        assert!(!record.is_stale(1_500, Some(500)));
        assert!(record.is_stale(1_501, Some(500)));
    }
}
