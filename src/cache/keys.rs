//! Cache key and tag vocabulary.
//!
//! Keys and tags are plain strings inside the store. These enums are the only
//! place that decides their spelling, so cache clients and the invalidation
//! router can never drift apart on formatting.

use std::borrow::Cow;
use std::fmt;

use uuid::Uuid;

/// Identifies one cached read model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A single customer record.
    Customer(Uuid),
    /// The customer directory listing.
    CustomerList,
    /// A single partner record.
    Partner(Uuid),
    /// Dashboard headline figures.
    DashboardSummary,
    /// Unbilled hours for one customer.
    UnbilledTime(Uuid),
    /// A single OKR with its key results.
    Okr(Uuid),
    /// A single SWOT analysis.
    Swot(Uuid),
    /// Portal-wide settings.
    Settings,
    /// A rendered report, by free-text report name and a variant such as a
    /// period or filter. `\` and `:` in the name are backslash-escaped, so a
    /// report's prefix never covers another report's keys.
    Report { name: String, variant: String },
}

impl CacheKey {
    /// Prefix shared by every variant of the named report.
    pub fn report_prefix(name: &str) -> String {
        format!("report:{}:", escape_segment(name))
    }
}

fn escape_segment(segment: &str) -> Cow<'_, str> {
    if !segment.contains(['\\', ':']) {
        return Cow::Borrowed(segment);
    }
    let mut escaped = String::with_capacity(segment.len() + 4);
    for ch in segment.chars() {
        if matches!(ch, '\\' | ':') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    Cow::Owned(escaped)
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer(id) => write!(f, "customer:{id}"),
            Self::CustomerList => f.write_str("customers:list"),
            Self::Partner(id) => write!(f, "partner:{id}"),
            Self::DashboardSummary => f.write_str("dashboard:summary"),
            Self::UnbilledTime(id) => write!(f, "time:unbilled:{id}"),
            Self::Okr(id) => write!(f, "okr:{id}"),
            Self::Swot(id) => write!(f, "swot:{id}"),
            Self::Settings => f.write_str("settings"),
            Self::Report { name, variant } => {
                write!(f, "{}{variant}", Self::report_prefix(name))
            }
        }
    }
}

/// Logical groupings used for tag invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheTag {
    /// Anything derived from the whole customer set.
    Customers,
    /// Anything derived from one customer.
    Customer(Uuid),
    Partners,
    Partner(Uuid),
    Leads,
    Dashboard,
    /// Time entries of one customer.
    Time(Uuid),
    Billing,
    Okr,
    OkrItem(Uuid),
    Swot,
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customers => f.write_str("customers"),
            Self::Customer(id) => write!(f, "customer:{id}"),
            Self::Partners => f.write_str("partners"),
            Self::Partner(id) => write!(f, "partner:{id}"),
            Self::Leads => f.write_str("leads"),
            Self::Dashboard => f.write_str("dashboard"),
            Self::Time(id) => write!(f, "time:{id}"),
            Self::Billing => f.write_str("billing"),
            Self::Okr => f.write_str("okr"),
            Self::OkrItem(id) => write!(f, "okr:{id}"),
            Self::Swot => f.write_str("swot"),
        }
    }
}

impl From<CacheTag> for String {
    fn from(tag: CacheTag) -> Self {
        tag.to_string()
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.to_string()
    }
}
