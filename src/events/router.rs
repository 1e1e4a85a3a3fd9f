//! Event-driven cache invalidation.
//!
//! Write paths only emit [`PortalEvent`]s. This module owns the mapping from
//! "what changed" to "which cached entries are stale".

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::{CacheKey, CacheStore, CacheTag};

use super::bus::{EventBus, Unsubscribe};
use super::topic::{EventTopic, PortalEvent};

/// What to drop from the cache in response to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// Every entry carrying any of these tags.
    Tags(BTreeSet<String>),
    /// Exactly these keys.
    Keys(Vec<String>),
    /// Every key starting with this literal prefix.
    Prefix(String),
    None,
}

impl Invalidation {
    fn tags<const N: usize>(tags: [CacheTag; N]) -> Self {
        Self::Tags(tags.into_iter().map(String::from).collect())
    }

    /// Apply to `cache`, returning the number of entries removed.
    pub fn apply<V>(&self, cache: &CacheStore<V>) -> usize {
        match self {
            Self::Tags(tags) => cache.invalidate_by_tags(tags),
            Self::Keys(keys) => keys.iter().filter(|key| cache.invalidate(key)).count(),
            Self::Prefix(prefix) => cache.invalidate_prefix(prefix),
            Self::None => 0,
        }
    }
}

/// One row of the binding table.
#[derive(Debug, Clone, Copy)]
pub struct Binding {
    pub topic: EventTopic,
    pub action: fn(&PortalEvent) -> Invalidation,
}

/// Topic to invalidation bindings, one row per topic.
pub static BINDINGS: &[Binding] = &[
    Binding {
        topic: EventTopic::CustomerUpserted,
        action: customer_changed,
    },
    Binding {
        topic: EventTopic::CustomerDeleted,
        action: customer_changed,
    },
    Binding {
        topic: EventTopic::PartnerUpserted,
        action: partner_changed,
    },
    Binding {
        topic: EventTopic::LeadCaptured,
        action: lead_captured,
    },
    Binding {
        topic: EventTopic::TimeEntryRecorded,
        action: time_entry_recorded,
    },
    Binding {
        topic: EventTopic::InvoiceIssued,
        action: invoice_issued,
    },
    Binding {
        topic: EventTopic::OkrUpdated,
        action: okr_updated,
    },
    Binding {
        topic: EventTopic::SwotUpdated,
        action: swot_updated,
    },
    Binding {
        topic: EventTopic::SettingsUpdated,
        action: settings_updated,
    },
    Binding {
        topic: EventTopic::ReportChanged,
        action: report_changed,
    },
];

/// Find the invalidation bound to `event`'s topic.
pub fn invalidation_for(event: &PortalEvent) -> Invalidation {
    let topic = event.topic();
    BINDINGS
        .iter()
        .find(|binding| binding.topic == topic)
        .map_or(Invalidation::None, |binding| (binding.action)(event))
}

fn customer_changed(event: &PortalEvent) -> Invalidation {
    match event {
        PortalEvent::CustomerUpserted { customer_id }
        | PortalEvent::CustomerDeleted { customer_id } => {
            Invalidation::tags([CacheTag::Customer(*customer_id), CacheTag::Customers])
        }
        _ => Invalidation::None,
    }
}

fn partner_changed(event: &PortalEvent) -> Invalidation {
    match event {
        PortalEvent::PartnerUpserted { partner_id } => {
            Invalidation::tags([CacheTag::Partner(*partner_id), CacheTag::Partners])
        }
        _ => Invalidation::None,
    }
}

fn lead_captured(event: &PortalEvent) -> Invalidation {
    match event {
        PortalEvent::LeadCaptured { .. } => {
            Invalidation::tags([CacheTag::Leads, CacheTag::Dashboard])
        }
        _ => Invalidation::None,
    }
}

fn time_entry_recorded(event: &PortalEvent) -> Invalidation {
    match event {
        PortalEvent::TimeEntryRecorded { customer_id, .. } => Invalidation::tags([
            CacheTag::Time(*customer_id),
            CacheTag::Billing,
            CacheTag::Dashboard,
        ]),
        _ => Invalidation::None,
    }
}

fn invoice_issued(event: &PortalEvent) -> Invalidation {
    match event {
        PortalEvent::InvoiceIssued { customer_id, .. } => {
            Invalidation::tags([CacheTag::Billing, CacheTag::Customer(*customer_id)])
        }
        _ => Invalidation::None,
    }
}

fn okr_updated(event: &PortalEvent) -> Invalidation {
    match event {
        PortalEvent::OkrUpdated { okr_id } => {
            Invalidation::tags([CacheTag::Okr, CacheTag::OkrItem(*okr_id)])
        }
        _ => Invalidation::None,
    }
}

fn swot_updated(event: &PortalEvent) -> Invalidation {
    match event {
        PortalEvent::SwotUpdated { .. } => Invalidation::tags([CacheTag::Swot]),
        _ => Invalidation::None,
    }
}

fn settings_updated(event: &PortalEvent) -> Invalidation {
    match event {
        PortalEvent::SettingsUpdated => Invalidation::Keys(vec![CacheKey::Settings.into()]),
        _ => Invalidation::None,
    }
}

fn report_changed(event: &PortalEvent) -> Invalidation {
    match event {
        PortalEvent::ReportChanged { report_name } => {
            Invalidation::Prefix(CacheKey::report_prefix(report_name))
        }
        _ => Invalidation::None,
    }
}

/// Live subscriptions that keep a cache in step with the bus.
#[derive(Debug)]
pub struct InvalidationRouter {
    handles: Vec<Unsubscribe>,
}

impl InvalidationRouter {
    /// Subscribe one handler per binding row.
    pub fn install<V>(bus: &EventBus, cache: Arc<CacheStore<V>>) -> Self
    where
        V: Send + Sync + 'static,
    {
        let handles = BINDINGS
            .iter()
            .map(|binding| {
                let cache = Arc::clone(&cache);
                let action = binding.action;
                bus.on(binding.topic, move |event| {
                    let invalidation = action(&event);
                    let removed = invalidation.apply(&cache);
                    debug!(
                        topic = %event.topic(),
                        invalidation = ?invalidation,
                        removed,
                        "cache invalidated by event"
                    );
                    async { Ok(()) }
                })
            })
            .collect::<Vec<_>>();

        info!(bindings = handles.len(), "invalidation router installed");
        Self { handles }
    }

    pub fn binding_count(&self) -> usize {
        self.handles.len()
    }

    /// Remove every subscription this router made.
    pub fn detach(self) {
        let removed = self
            .handles
            .into_iter()
            .map(Unsubscribe::unsubscribe)
            .filter(|removed| *removed)
            .count();
        debug!(removed, "invalidation router detached");
    }
}
