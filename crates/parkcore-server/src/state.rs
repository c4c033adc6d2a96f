// Shared application state threaded through the HTTP router and the
// websocket handler. Generic over the cache and payment provider
// implementations so the same router-building code serves both the real
// (Redis + Stripe-shaped) binary and in-memory-backed tests.

use std::sync::Arc;

use parkcore_core::availability::AvailabilityService;
use parkcore_core::coordinator::breaker::CacheBreaker;
use parkcore_core::coordinator::payment::PaymentProvider;
use parkcore_core::coordinator::BookingCoordinator;
use parkcore_core::lease::cache::CoordinationCache;

use crate::config::ServerConfig;
use crate::reference_data::ReferenceDataRepo;
use crate::ws::room::RoomRegistry;

pub struct AppState<C: CoordinationCache, P: PaymentProvider> {
    pub coordinator: Arc<BookingCoordinator<C, P>>,
    pub availability: Arc<AvailabilityService<C>>,
    pub rooms: Arc<RoomRegistry<C>>,
    pub reference_data: Arc<ReferenceDataRepo>,
    pub breaker: Arc<CacheBreaker>,
    pub config: Arc<ServerConfig>,
}

impl<C: CoordinationCache, P: PaymentProvider> Clone for AppState<C, P> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
            availability: Arc::clone(&self.availability),
            rooms: Arc::clone(&self.rooms),
            reference_data: Arc::clone(&self.reference_data),
            breaker: Arc::clone(&self.breaker),
            config: Arc::clone(&self.config),
        }
    }
}
