//! Synthetic portal workload used by the `simulate` command.
//!
//! Reads are spread deterministically over the customer set, with a listing
//! read, a customer edit and an unrelated portal event mixed in at fixed
//! strides, so the resulting statistics are reproducible.

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::application::context::AppContext;
use crate::application::error::AppError;
use crate::cache::{CacheStats, WarmupSummary};
use crate::config::SimulateArgs;
use crate::events::{BusStats, PortalEvent};

const LIST_EVERY: usize = 10;
const UPDATE_EVERY: usize = 25;
const SIDE_EVENT_EVERY: usize = 40;
const READ_STRIDE: usize = 7;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub customers: usize,
    pub reads: usize,
    pub updates: usize,
    pub side_events: usize,
    pub warmup: WarmupSummary,
    pub cache: CacheStats,
    pub hit_rate: f64,
    pub bus: BusStats,
}

/// Warm the cache, then replay the workload against `ctx`.
pub async fn run(ctx: &AppContext, args: &SimulateArgs) -> Result<SimulationReport, AppError> {
    let customers = ctx.customers();
    let warmup = customers.warm().await?.summary();

    let roster: Vec<Uuid> = customers
        .list_customers()
        .await?
        .iter()
        .map(|customer| customer.id)
        .collect();

    let mut updates = 0;
    let mut side_events = 0;
    for step in 0..args.reads {
        if let Some(id) = pick(&roster, step) {
            customers.get_customer(id).await?;
        }
        if step % LIST_EVERY == 0 {
            customers.list_customers().await?;
        }
        if step > 0
            && step % UPDATE_EVERY == 0
            && let Some(id) = pick(&roster, step / UPDATE_EVERY)
        {
            let mut customer = (*customers.get_customer(id).await?).clone();
            customer.name = format!("{} (rev {step})", customer.name);
            customers.upsert_customer(customer).await?;
            updates += 1;
        }
        if step > 0 && step % SIDE_EVENT_EVERY == 0 {
            ctx.bus().emit(side_event(step)).await;
            side_events += 1;
        }
    }

    let cache = ctx.cache().get_stats();
    let report = SimulationReport {
        customers: roster.len(),
        reads: args.reads,
        updates,
        side_events,
        warmup,
        hit_rate: cache.hit_rate(),
        cache,
        bus: ctx.bus().get_stats(),
    };
    info!(
        reads = report.reads,
        updates = report.updates,
        hit_rate = report.hit_rate,
        "simulation finished"
    );
    Ok(report)
}

fn pick(roster: &[Uuid], step: usize) -> Option<Uuid> {
    if roster.is_empty() {
        return None;
    }
    roster.get((step * READ_STRIDE) % roster.len()).copied()
}

fn side_event(step: usize) -> PortalEvent {
    match (step / SIDE_EVENT_EVERY) % 3 {
        0 => PortalEvent::LeadCaptured {
            lead_id: Uuid::new_v4(),
        },
        1 => PortalEvent::SettingsUpdated,
        _ => PortalEvent::ReportChanged {
            report_name: "Monthly revenue".to_string(),
        },
    }
}
