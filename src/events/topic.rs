//! Event topics and their payloads.
//!
//! Every topic has exactly one payload shape, carried by the matching
//! [`PortalEvent`] variant, so publishers and subscribers cannot disagree on
//! what a topic means.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// Channel a subscription listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTopic {
    CustomerUpserted,
    CustomerDeleted,
    PartnerUpserted,
    LeadCaptured,
    TimeEntryRecorded,
    InvoiceIssued,
    OkrUpdated,
    SwotUpdated,
    SettingsUpdated,
    ReportChanged,
}

impl EventTopic {
    pub const ALL: [EventTopic; 10] = [
        EventTopic::CustomerUpserted,
        EventTopic::CustomerDeleted,
        EventTopic::PartnerUpserted,
        EventTopic::LeadCaptured,
        EventTopic::TimeEntryRecorded,
        EventTopic::InvoiceIssued,
        EventTopic::OkrUpdated,
        EventTopic::SwotUpdated,
        EventTopic::SettingsUpdated,
        EventTopic::ReportChanged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CustomerUpserted => "customer_upserted",
            Self::CustomerDeleted => "customer_deleted",
            Self::PartnerUpserted => "partner_upserted",
            Self::LeadCaptured => "lead_captured",
            Self::TimeEntryRecorded => "time_entry_recorded",
            Self::InvoiceIssued => "invoice_issued",
            Self::OkrUpdated => "okr_updated",
            Self::SwotUpdated => "swot_updated",
            Self::SettingsUpdated => "settings_updated",
            Self::ReportChanged => "report_changed",
        }
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed domain mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum PortalEvent {
    /// A customer was created or edited.
    CustomerUpserted { customer_id: Uuid },
    /// A customer was removed.
    CustomerDeleted { customer_id: Uuid },
    /// A partner was created or edited.
    PartnerUpserted { partner_id: Uuid },
    /// A lead arrived through the intake form.
    LeadCaptured { lead_id: Uuid },
    /// Hours were logged against a customer.
    TimeEntryRecorded { customer_id: Uuid, entry_id: Uuid },
    /// An invoice was issued to a customer.
    InvoiceIssued { invoice_id: Uuid, customer_id: Uuid },
    /// An OKR or one of its key results changed.
    OkrUpdated { okr_id: Uuid },
    /// A SWOT analysis changed.
    SwotUpdated { analysis_id: Uuid },
    /// Portal settings were saved.
    SettingsUpdated,
    /// A report definition changed. Report names are free text.
    ReportChanged { report_name: String },
}

impl PortalEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::CustomerUpserted { .. } => EventTopic::CustomerUpserted,
            Self::CustomerDeleted { .. } => EventTopic::CustomerDeleted,
            Self::PartnerUpserted { .. } => EventTopic::PartnerUpserted,
            Self::LeadCaptured { .. } => EventTopic::LeadCaptured,
            Self::TimeEntryRecorded { .. } => EventTopic::TimeEntryRecorded,
            Self::InvoiceIssued { .. } => EventTopic::InvoiceIssued,
            Self::OkrUpdated { .. } => EventTopic::OkrUpdated,
            Self::SwotUpdated { .. } => EventTopic::SwotUpdated,
            Self::SettingsUpdated => EventTopic::SettingsUpdated,
            Self::ReportChanged { .. } => EventTopic::ReportChanged,
        }
    }
}
