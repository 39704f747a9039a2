// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live driver position index, partitioned by vehicle class.
//!
//! Drivers are bucketed into H3 cells (resolution 8, ~460 m edge) per class
//! so tier queries never see other tiers. `nearby` expands grid-disk rings
//! around the origin cell, then exact-filters by Haversine distance. Writes
//! are idempotent upserts; the last writer wins. Canonical driver status
//! lives in the store, so a stale entry here is filtered out at match time.

use std::collections::{HashMap, HashSet};

use h3o::{CellIndex, LatLng, Resolution};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::geo::haversine_km;
use crate::model::{GeoPoint, VehicleClass};

/// Approximate center-to-center spacing of adjacent resolution-8 cells (km).
const CELL_SPACING_KM: f64 = 0.7;

/// Upper bound on ring expansion, regardless of query radius.
const MAX_RINGS: u32 = 256;

#[derive(Default)]
struct ClassIndex {
    cells: HashMap<CellIndex, HashSet<Uuid>>,
    drivers: HashMap<Uuid, (CellIndex, GeoPoint)>,
}

/// Per-class H3 bucket index over live driver positions.
pub struct GeoIndex {
    resolution: Resolution,
    classes: RwLock<HashMap<VehicleClass, ClassIndex>>,
}

impl GeoIndex {
    pub fn new() -> Self {
        Self { resolution: Resolution::Eight, classes: RwLock::new(HashMap::new()) }
    }

    fn cell_for(&self, point: GeoPoint) -> Result<CellIndex> {
        let latlng = LatLng::new(point.lat, point.lng)
            .map_err(|e| Error::validation(format!("invalid coordinates: {e}")))?;
        Ok(latlng.to_cell(self.resolution))
    }

    /// Idempotent upsert of a driver's position.
    pub async fn add_driver(
        &self,
        class: VehicleClass,
        driver_id: Uuid,
        point: GeoPoint,
    ) -> Result<()> {
        let cell = self.cell_for(point)?;
        let mut classes = self.classes.write().await;
        let index = classes.entry(class).or_default();
        if let Some((old_cell, _)) = index.drivers.insert(driver_id, (cell, point)) {
            if old_cell != cell {
                if let Some(bucket) = index.cells.get_mut(&old_cell) {
                    bucket.remove(&driver_id);
                    if bucket.is_empty() {
                        index.cells.remove(&old_cell);
                    }
                }
            }
        }
        index.cells.entry(cell).or_default().insert(driver_id);
        Ok(())
    }

    /// Idempotent removal.
    pub async fn remove_driver(&self, class: VehicleClass, driver_id: Uuid) {
        let mut classes = self.classes.write().await;
        let Some(index) = classes.get_mut(&class) else {
            return;
        };
        if let Some((cell, _)) = index.drivers.remove(&driver_id) {
            if let Some(bucket) = index.cells.get_mut(&cell) {
                bucket.remove(&driver_id);
                if bucket.is_empty() {
                    index.cells.remove(&cell);
                }
            }
        }
    }

    /// Drivers within `radius_km` of `origin`, ascending by distance, at most
    /// `max_count` entries.
    pub async fn nearby(
        &self,
        class: VehicleClass,
        origin: GeoPoint,
        radius_km: f64,
        max_count: usize,
    ) -> Result<Vec<(Uuid, f64)>> {
        let origin_cell = self.cell_for(origin)?;
        let rings = ((radius_km / CELL_SPACING_KM).ceil() as u32 + 1).min(MAX_RINGS);
        let disk: Vec<CellIndex> = origin_cell.grid_disk(rings);

        let classes = self.classes.read().await;
        let Some(index) = classes.get(&class) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<(Uuid, f64)> = Vec::new();
        for cell in disk {
            let Some(bucket) = index.cells.get(&cell) else {
                continue;
            };
            for driver_id in bucket {
                if let Some((_, point)) = index.drivers.get(driver_id) {
                    let distance = haversine_km(origin, *point);
                    if distance <= radius_km {
                        hits.push((*driver_id, distance));
                    }
                }
            }
        }
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(max_count);
        Ok(hits)
    }

    /// Last indexed position for a driver, if any.
    pub async fn position(&self, class: VehicleClass, driver_id: Uuid) -> Option<GeoPoint> {
        let classes = self.classes.read().await;
        classes.get(&class)?.drivers.get(&driver_id).map(|(_, point)| *point)
    }
}

impl Default for GeoIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "geo_index_tests.rs"]
mod tests;
