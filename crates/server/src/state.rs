// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared gateway state: the platform context plus service handles and the
//! socket room registry.

use std::sync::Arc;

use hail_core::context::Platform;
use hail_core::services::dispatch::DispatchService;
use hail_core::services::location::LocationService;
use hail_core::services::payments::PaymentService;
use hail_core::services::registry::RegistryService;
use hail_core::services::rides::RideService;
use hail_core::services::trips::TripService;

use crate::realtime::rooms::Rooms;

pub struct Gateway {
    pub platform: Arc<Platform>,
    pub registry: RegistryService,
    pub rides: RideService,
    pub dispatch: DispatchService,
    pub trips: TripService,
    pub payments: PaymentService,
    pub location: LocationService,
    pub rooms: Arc<Rooms>,
}

impl Gateway {
    pub fn new(platform: Arc<Platform>) -> Arc<Self> {
        Arc::new(Self {
            registry: RegistryService::new(Arc::clone(&platform)),
            rides: RideService::new(Arc::clone(&platform)),
            dispatch: DispatchService::new(Arc::clone(&platform)),
            trips: TripService::new(Arc::clone(&platform)),
            payments: PaymentService::new(Arc::clone(&platform)),
            location: LocationService::new(Arc::clone(&platform)),
            rooms: Arc::new(Rooms::new()),
            platform,
        })
    }
}
