use agent_chat_upstream::HistoryItem;
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DateRange {
    #[default]
    All,
    Today,
    Week,
    Month,
}

impl DateRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Earliest activity instant still inside the range.
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::All => None,
            Self::Today => now.date_naive().and_hms_opt(0, 0, 0).map(|midnight| midnight.and_utc()),
            Self::Week => Some(now - Duration::days(7)),
            Self::Month => now.checked_sub_months(Months::new(1)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub range: DateRange,
    #[serde(default)]
    pub agent_id: Option<String>,
}

impl HistoryQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .min(MAX_HISTORY_LIMIT)
    }

    pub fn matches(&self, item: &HistoryItem, now: DateTime<Utc>) -> bool {
        if let Some(needle) = self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let haystack = item.client_input().to_lowercase();
            if !haystack.contains(&needle.to_lowercase()) {
                return false;
            }
        }

        match self.range.since(now) {
            None => true,
            Some(since) => item.activity_at().is_some_and(|at| at >= since),
        }
    }

    pub fn apply(&self, items: Vec<HistoryItem>, now: DateTime<Utc>) -> Vec<HistoryItem> {
        items
            .into_iter()
            .filter(|item| self.matches(item, now))
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub data: Vec<HistoryItem>,
}
