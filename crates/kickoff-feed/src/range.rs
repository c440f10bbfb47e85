use chrono::{Datelike, Local, NaiveDate};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive date window requested from upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// First day of `today`'s month through `today`.
    pub fn month_to_date(today: NaiveDate) -> Self {
        Self {
            from: today.with_day(1).unwrap_or(today),
            to: today,
        }
    }

    /// Month-to-date in the local time zone.
    pub fn current() -> Self {
        Self::month_to_date(Local::now().date_naive())
    }

    pub fn date_from(&self) -> String {
        self.from.format(DATE_FORMAT).to_string()
    }

    pub fn date_to(&self) -> String {
        self.to.format(DATE_FORMAT).to_string()
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.date_from(), self.date_to())
    }
}
