use std::collections::BTreeSet;

use crate::document::MatchRecord;

/// Per-connection inclusion predicate over league code and match status.
///
/// An empty set is a wildcard for its dimension, so the default value
/// matches every record. Criteria are never edited in place: an update
/// builds a new value and swaps it in wholesale.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    leagues: BTreeSet<String>,
    statuses: BTreeSet<String>,
}

impl FilterCriteria {
    pub fn new<L, S>(leagues: L, statuses: S) -> Self
    where
        L: IntoIterator,
        L::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        Self {
            leagues: leagues.into_iter().map(Into::into).collect(),
            statuses: statuses.into_iter().map(Into::into).collect(),
        }
    }

    /// Criteria that match every record.
    pub fn wildcard() -> Self {
        Self::default()
    }

    pub fn leagues(&self) -> &BTreeSet<String> {
        &self.leagues
    }

    pub fn statuses(&self) -> &BTreeSet<String> {
        &self.statuses
    }

    pub fn is_wildcard(&self) -> bool {
        self.leagues.is_empty() && self.statuses.is_empty()
    }

    /// Whether `record` passes both the league and the status dimension.
    pub fn matches(&self, record: &MatchRecord) -> bool {
        self.matches_fields(record.competition_code(), record.status())
    }

    pub fn matches_fields(&self, competition_code: &str, status: &str) -> bool {
        let league_ok = self.leagues.is_empty() || self.leagues.contains(competition_code);
        let status_ok = self.statuses.is_empty() || self.statuses.contains(status);
        league_ok && status_ok
    }
}

impl std::fmt::Display for FilterCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "leagues={:?} statuses={:?}", self.leagues, self.statuses)
    }
}
