//! Customer directory: a cache client over an async repository.
//!
//! Reads go through the shared cache with customer tags. Writes go to the
//! repository and then announce themselves on the bus; the invalidation
//! router decides what becomes stale.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::cache::{
    CacheKey, CacheStore, CacheTag, EntryOptions, ErasedValue, FetchError, WarmupEntry,
    WarmupReport, mutex_lock,
};
use crate::events::{EventBus, PortalEvent};

const SOURCE: &str = "application::customers";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Customer {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

/// Persistence for customer records.
#[async_trait]
pub trait CustomerRepo: Send + Sync {
    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, RepoError>;

    /// All customers ordered by name.
    async fn list_customers(&self) -> Result<Vec<Customer>, RepoError>;

    async fn upsert_customer(&self, customer: Customer) -> Result<Customer, RepoError>;

    /// Returns whether a record was removed.
    async fn delete_customer(&self, id: Uuid) -> Result<bool, RepoError>;
}

/// Process-local repository. Counts reads so callers can observe cache
/// effectiveness.
#[derive(Debug, Default)]
pub struct InMemoryCustomerRepo {
    rows: Mutex<BTreeMap<Uuid, Customer>>,
    reads: AtomicUsize,
}

impl InMemoryCustomerRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository pre-filled with `count` generated customers.
    pub fn with_generated(count: usize) -> Self {
        let repo = Self::new();
        {
            let mut rows = mutex_lock(&repo.rows, SOURCE, "with_generated");
            for n in 0..count {
                let customer = Customer::new(
                    format!("Customer {n:04}"),
                    format!("customer{n}@example.test"),
                );
                rows.insert(customer.id, customer);
            }
        }
        repo
    }

    /// Number of `find_customer` and `list_customers` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CustomerRepo for InMemoryCustomerRepo {
    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, RepoError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(mutex_lock(&self.rows, SOURCE, "find_customer").get(&id).cloned())
    }

    async fn list_customers(&self) -> Result<Vec<Customer>, RepoError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let mut customers: Vec<Customer> = mutex_lock(&self.rows, SOURCE, "list_customers")
            .values()
            .cloned()
            .collect();
        customers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(customers)
    }

    async fn upsert_customer(&self, customer: Customer) -> Result<Customer, RepoError> {
        if customer.name.trim().is_empty() {
            return Err(RepoError::InvalidInput {
                message: "customer name must not be empty".to_string(),
            });
        }
        mutex_lock(&self.rows, SOURCE, "upsert_customer").insert(customer.id, customer.clone());
        Ok(customer)
    }

    async fn delete_customer(&self, id: Uuid) -> Result<bool, RepoError> {
        Ok(mutex_lock(&self.rows, SOURCE, "delete_customer")
            .remove(&id)
            .is_some())
    }
}

/// Cached customer reads and event-announcing writes.
#[derive(Clone)]
pub struct CustomerService {
    repo: Arc<dyn CustomerRepo>,
    cache: Arc<CacheStore<ErasedValue>>,
    bus: EventBus,
}

impl CustomerService {
    pub fn new(
        repo: Arc<dyn CustomerRepo>,
        cache: Arc<CacheStore<ErasedValue>>,
        bus: EventBus,
    ) -> Self {
        Self { repo, cache, bus }
    }

    fn record_options(id: Uuid) -> EntryOptions {
        EntryOptions::new().tag(CacheTag::Customer(id))
    }

    fn list_options() -> EntryOptions {
        EntryOptions::new().tag(CacheTag::Customers)
    }

    pub async fn get_customer(&self, id: Uuid) -> Result<Arc<Customer>, AppError> {
        let repo = Arc::clone(&self.repo);
        self.cache
            .get_typed::<Customer, _, _, AppError>(
                &CacheKey::Customer(id).to_string(),
                Self::record_options(id),
                || async move { repo.find_customer(id).await?.ok_or(AppError::NotFound) },
            )
            .await
    }

    pub async fn list_customers(&self) -> Result<Arc<Vec<Customer>>, AppError> {
        let repo = Arc::clone(&self.repo);
        self.cache
            .get_typed::<Vec<Customer>, _, _, AppError>(
                &CacheKey::CustomerList.to_string(),
                Self::list_options(),
                || async move { Ok::<_, AppError>(repo.list_customers().await?) },
            )
            .await
    }

    /// Create or replace a customer, then announce the change.
    pub async fn upsert_customer(&self, mut customer: Customer) -> Result<Customer, AppError> {
        customer.updated_at = OffsetDateTime::now_utc();
        let saved = self.repo.upsert_customer(customer).await?;

        let report = self
            .bus
            .emit(PortalEvent::CustomerUpserted {
                customer_id: saved.id,
            })
            .await;
        debug!(
            customer_id = %saved.id,
            delivered = report.delivered,
            failed = report.failures.len(),
            "customer upserted"
        );
        Ok(saved)
    }

    /// Remove a customer. Returns whether it existed; nothing is announced
    /// when it did not.
    pub async fn delete_customer(&self, id: Uuid) -> Result<bool, AppError> {
        let removed = self.repo.delete_customer(id).await?;
        if removed {
            self.bus
                .emit(PortalEvent::CustomerDeleted { customer_id: id })
                .await;
        }
        Ok(removed)
    }

    /// Pre-populate the directory listing and every customer record.
    pub async fn warm(&self) -> Result<WarmupReport, AppError> {
        let customers = self.repo.list_customers().await?;

        let mut entries = Vec::with_capacity(customers.len() + 1);
        let repo = Arc::clone(&self.repo);
        entries.push(
            WarmupEntry::new(CacheKey::CustomerList, async move {
                let list = repo.list_customers().await.map_err(FetchError::new)?;
                Ok::<_, FetchError>(Arc::new(list) as ErasedValue)
            })
            .with_options(Self::list_options()),
        );
        for customer in customers {
            let id = customer.id;
            let repo = Arc::clone(&self.repo);
            entries.push(
                WarmupEntry::new(CacheKey::Customer(id), async move {
                    let found = repo.find_customer(id).await.map_err(FetchError::new)?;
                    let customer =
                        found.ok_or_else(|| FetchError::msg(format!("customer {id} vanished")))?;
                    Ok::<_, FetchError>(Arc::new(customer) as ErasedValue)
                })
                .with_options(Self::record_options(id)),
            );
        }

        let report = self.cache.warmup(entries).await;
        info!(
            warmed = report.warmed.len(),
            failed = report.failures.len(),
            "customer cache warmed"
        );
        Ok(report)
    }
}
