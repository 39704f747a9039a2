// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Telemetry ingest.
//!
//! The hot path touches only the cache and the live geo index; persistent
//! history is buffered and flushed in bulk (every second, or early at 100
//! samples, synchronously on shutdown). Under a crash the unflushed tail is
//! lost; the live index carries the authoritative current position.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::TOPIC_LOCATION_UPDATES;
use crate::context::Platform;
use crate::error::{Error, Result};
use crate::events::LocationUpdate;
use crate::model::{DriverLocationSample, DriverMeta, DriverStatus, GeoPoint};
use crate::time::epoch_ms;

pub fn driver_meta_key(driver_id: Uuid) -> String {
    format!("driver:meta:{driver_id}")
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySample {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

#[derive(Clone)]
pub struct LocationService {
    platform: Arc<Platform>,
    buffer: Arc<Mutex<Vec<DriverLocationSample>>>,
}

impl LocationService {
    pub fn new(platform: Arc<Platform>) -> Self {
        Self { platform, buffer: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Process one telemetry sample; returns the ingest timestamp for the
    /// socket ack.
    pub async fn ingest(&self, driver_id: Uuid, sample: TelemetrySample) -> Result<u64> {
        if !(-90.0..=90.0).contains(&sample.latitude)
            || !(-180.0..=180.0).contains(&sample.longitude)
        {
            return Err(Error::validation("coordinates out of range"));
        }

        let meta = self.driver_meta(driver_id).await?;
        let now = epoch_ms();
        let point = GeoPoint { lat: sample.latitude, lng: sample.longitude };

        if meta.status == DriverStatus::Online {
            self.platform.geo.add_driver(meta.vehicle_class, driver_id, point).await?;
        }

        let row = DriverLocationSample {
            driver_id,
            lat: sample.latitude,
            lng: sample.longitude,
            heading: sample.heading,
            speed: sample.speed,
            accuracy: sample.accuracy,
            recorded_at: now,
        };
        let flush_now = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(row);
            buffer.len() >= self.platform.config.location_batch_max
        };
        if flush_now {
            self.flush().await;
        }

        // Best-effort republish for downstream consumers.
        let update = LocationUpdate {
            driver_id,
            tenant: meta.tenant_id,
            lat: sample.latitude,
            lng: sample.longitude,
            heading: sample.heading,
            speed: sample.speed,
            vehicle_class: meta.vehicle_class,
            status: meta.status,
            timestamp: now,
        };
        if let Ok(value) = serde_json::to_value(&update) {
            if let Err(e) = self
                .platform
                .bus
                .publish(TOPIC_LOCATION_UPDATES, &meta.tenant_id.to_string(), value)
                .await
            {
                warn!(driver_id = %driver_id, err = %e, "location publish failed");
            }
        }

        Ok(now)
    }

    /// Cache-first metadata resolution (5 min TTL), store on miss.
    async fn driver_meta(&self, driver_id: Uuid) -> Result<DriverMeta> {
        let key = driver_meta_key(driver_id);
        if let Some(meta) = self.platform.cache.get::<DriverMeta>(&key).await {
            return Ok(meta);
        }
        let driver = self
            .platform
            .store
            .driver(driver_id)
            .await
            .ok_or_else(|| Error::not_found("driver", driver_id))?;
        let meta = DriverMeta::from(&driver);
        self.platform
            .cache
            .set(&key, &meta, Some(self.platform.config.driver_meta_ttl))
            .await;
        Ok(meta)
    }

    /// Drain the buffer into one bulk append.
    pub async fn flush(&self) {
        let batch: Vec<DriverLocationSample> = {
            let mut buffer = self.buffer.lock().await;
            std::mem::take(&mut *buffer)
        };
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        self.platform.store.append_locations(batch).await;
        debug!(count, "flushed location history batch");
    }

    /// Periodic flusher; performs a final synchronous flush on shutdown.
    pub fn spawn_flusher(&self) {
        let service = self.clone();
        let shutdown = self.platform.shutdown.clone();
        let interval = self.platform.config.location_flush_interval;
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        service.flush().await;
                        break;
                    }
                    _ = timer.tick() => {}
                }
                service.flush().await;
            }
        });
    }

    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }
}

#[cfg(test)]
#[path = "location_tests.rs"]
mod tests;
