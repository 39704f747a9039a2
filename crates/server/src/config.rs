// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use hail_core::config::PlatformConfig;
use hail_core::sim::SimConfig;

/// Configuration for the hail dispatch server.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "haild", about = "Ride-hailing dispatch platform")]
pub struct ServerConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "HAIL_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 7450, env = "HAIL_PORT")]
    pub port: u16,

    /// NATS server URL for the event bus. Unset runs the in-process bus.
    #[arg(long, env = "HAIL_NATS_URL")]
    pub nats_url: Option<String>,

    /// Subject prefix on the NATS bus.
    #[arg(long, default_value = "hail", env = "HAIL_NATS_PREFIX")]
    pub nats_prefix: String,

    /// Candidate search radius in kilometers.
    #[arg(long, default_value_t = 5.0, env = "HAIL_SEARCH_RADIUS_KM")]
    pub search_radius_km: f64,

    /// Offer time-to-live in seconds.
    #[arg(long, default_value_t = 15, env = "HAIL_OFFER_TTL_SECS")]
    pub offer_ttl_secs: u64,

    /// Offer expiry sweep cadence in seconds.
    #[arg(long, default_value_t = 5, env = "HAIL_OFFER_SWEEP_SECS")]
    pub offer_sweep_secs: u64,

    /// Mock card-PSP approval probability in [0, 1].
    #[arg(long, default_value_t = 0.95, env = "HAIL_PSP_SUCCESS_PROBABILITY")]
    pub psp_success_probability: f64,

    /// Simulated driver speed in km/h.
    #[arg(long, default_value_t = 30.0, env = "HAIL_SIM_SPEED_KMH")]
    pub sim_speed_kmh: f64,

    /// Simulator tick interval in milliseconds.
    #[arg(long, default_value_t = 2000, env = "HAIL_SIM_TICK_MS")]
    pub sim_tick_ms: u64,

    /// Location history flush interval in milliseconds.
    #[arg(long, default_value_t = 1000, env = "HAIL_LOCATION_FLUSH_MS")]
    pub location_flush_ms: u64,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Project the flag set onto the core platform knobs.
    pub fn platform(&self) -> PlatformConfig {
        PlatformConfig {
            search_radius_km: self.search_radius_km,
            offer_ttl: Duration::from_secs(self.offer_ttl_secs),
            offer_sweep_interval: Duration::from_secs(self.offer_sweep_secs),
            psp_success_probability: self.psp_success_probability,
            location_flush_interval: Duration::from_millis(self.location_flush_ms),
            sim: SimConfig {
                tick: Duration::from_millis(self.sim_tick_ms),
                speed_kmh: self.sim_speed_kmh,
                ..SimConfig::default()
            },
            ..PlatformConfig::default()
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
