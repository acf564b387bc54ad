//! Monthly partition scheme.
//!
//! A partition is a calendar month, labelled `YYYY-MM`. Its window runs from
//! the 1st of the month through the last day of the month, inclusive.
//! Partitions start at a fixed epoch month; keys before it are invalid.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Months, NaiveDate};

use legora_crawler::CrawlArgs;
use legora_shared::{LegoraError, Result};

/// A calendar-month partition label.
///
/// Always holds the first day of its month; ordering follows the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    start: NaiveDate,
}

impl PartitionKey {
    /// Key of the month containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            start: date.with_day(1).unwrap_or(date),
        }
    }

    /// First day of the month.
    pub fn first_day(&self) -> NaiveDate {
        self.start
    }

    /// Last day of the month.
    pub fn last_day(&self) -> NaiveDate {
        self.start
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(self.start)
    }

    /// The following month's key.
    pub fn next(&self) -> Self {
        Self {
            start: self
                .start
                .checked_add_months(Months::new(1))
                .unwrap_or(self.start),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.start.year(), self.start.month())
    }
}

/// Parses `YYYY-MM`, or the month-start date `YYYY-MM-01`.
///
/// Syntax only; [`MonthlyPartitions::parse_key`] also enforces the epoch.
impl FromStr for PartitionKey {
    type Err = LegoraError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || {
            LegoraError::partition(format!(
                "`{s}` is not a partition key (expected YYYY-MM or YYYY-MM-01)"
            ))
        };

        if !s.is_ascii() {
            return Err(invalid());
        }
        let month_part = match s.len() {
            7 => s,
            10 => {
                if &s[7..] != "-01" {
                    return Err(invalid());
                }
                &s[..7]
            }
            _ => return Err(invalid()),
        };

        let bytes = month_part.as_bytes();
        let shape_ok = bytes[4] == b'-'
            && bytes[..4].iter().all(u8::is_ascii_digit)
            && bytes[5..].iter().all(u8::is_ascii_digit);
        if !shape_ok {
            return Err(invalid());
        }

        let year: i32 = month_part[..4].parse().map_err(|_| invalid())?;
        let month: u32 = month_part[5..].parse().map_err(|_| invalid())?;
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        Ok(Self { start })
    }
}

/// Inclusive date bounds of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionWindow {
    pub key: PartitionKey,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

impl PartitionWindow {
    /// Crawl parameters for this window.
    pub fn crawl_args(&self) -> CrawlArgs {
        CrawlArgs {
            from_date: self.from_date,
            to_date: self.to_date,
            partition_date: self.key.to_string(),
        }
    }
}

/// The monthly partition scheme anchored at an epoch month.
#[derive(Debug, Clone, Copy)]
pub struct MonthlyPartitions {
    epoch: PartitionKey,
}

impl MonthlyPartitions {
    /// `epoch` may be any day; the scheme starts at its month.
    pub fn new(epoch: NaiveDate) -> Self {
        Self {
            epoch: PartitionKey::containing(epoch),
        }
    }

    /// First partition of the scheme.
    pub fn epoch(&self) -> PartitionKey {
        self.epoch
    }

    /// Parse a key and check it belongs to the scheme.
    pub fn parse_key(&self, s: &str) -> Result<PartitionKey> {
        let key: PartitionKey = s.parse()?;
        if key < self.epoch {
            return Err(LegoraError::partition(format!(
                "partition {key} is before the first partition {}",
                self.epoch
            )));
        }
        Ok(key)
    }

    /// Window of `key`: its first day through its last day.
    pub fn resolve(&self, key: &PartitionKey) -> PartitionWindow {
        PartitionWindow {
            key: *key,
            from_date: key.first_day(),
            to_date: key.last_day(),
        }
    }

    /// Every partition from the epoch through the month containing `date`.
    /// Empty when `date` is before the epoch.
    pub fn keys_through(&self, date: NaiveDate) -> Vec<PartitionKey> {
        self.keys_between(self.epoch, PartitionKey::containing(date))
    }

    /// Partitions `from..=through`, clamped to the epoch.
    pub fn keys_between(&self, from: PartitionKey, through: PartitionKey) -> Vec<PartitionKey> {
        let mut keys = Vec::new();
        let mut key = from.max(self.epoch);
        while key <= through {
            keys.push(key);
            let next = key.next();
            if next == key {
                break;
            }
            key = next;
        }
        keys
    }
}
