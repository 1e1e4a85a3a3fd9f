//! Dependency root: one cache, one bus, one router, shared by every service.

use std::sync::Arc;

use tracing::info;

use crate::application::customers::{CustomerRepo, CustomerService};
use crate::application::error::AppError;
use crate::cache::{CacheStore, ErasedValue};
use crate::config::Settings;
use crate::events::{EventBus, InvalidationRouter};

pub struct AppContext {
    cache: Arc<CacheStore<ErasedValue>>,
    bus: EventBus,
    router: InvalidationRouter,
    customers: CustomerService,
}

impl AppContext {
    pub fn new(settings: &Settings, customer_repo: Arc<dyn CustomerRepo>) -> Result<Self, AppError> {
        let cache = Arc::new(CacheStore::new(settings.cache.clone())?);
        let bus = EventBus::new(settings.events.clone())?;
        let router = InvalidationRouter::install(&bus, Arc::clone(&cache));
        let customers = CustomerService::new(customer_repo, Arc::clone(&cache), bus.clone());

        info!(
            max_size = cache.max_size(),
            default_ttl_secs = cache.default_ttl().map(|ttl| ttl.as_secs()),
            max_history = settings.events.max_history_size,
            "application context ready"
        );

        Ok(Self {
            cache,
            bus,
            router,
            customers,
        })
    }

    pub fn cache(&self) -> &Arc<CacheStore<ErasedValue>> {
        &self.cache
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn customers(&self) -> &CustomerService {
        &self.customers
    }

    /// Detach the router, drop every remaining subscription and empty the
    /// cache. Services cloned out of the context keep working against an
    /// empty, unsubscribed cache.
    pub fn shutdown(self) {
        let Self {
            cache, bus, router, ..
        } = self;
        router.detach();
        bus.clear(None);
        cache.clear();
        info!("application context shut down");
    }
}
