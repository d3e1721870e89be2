use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Case-sensitive page identifier; may name a page that does not exist yet.
pub type PageName = String;

/// Milliseconds since the Unix epoch
pub type Timestamp = u64;

pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub name: PageName,
    pub version: u32,
    pub last_modified: Timestamp,
    pub author: Option<String>,
}

/// An editing claim on a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLock {
    pub page: PageName,
    pub locker: String,
    pub acquired: Timestamp,
    pub expiry: Timestamp,
}

impl PageLock {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expiry
    }

    /// Minutes left before the lock lapses, rounded down.
    pub fn minutes_left(&self, now: Timestamp) -> u64 {
        self.expiry.saturating_sub(now) / 60_000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum HeadingLevel {
    Large,
    Medium,
    Small,
}

impl HeadingLevel {
    pub fn html_tag(self) -> &'static str {
        match self {
            HeadingLevel::Large => "h2",
            HeadingLevel::Medium => "h3",
            HeadingLevel::Small => "h4",
        }
    }

    /// Nesting depth inside a table of contents, starting at 0.
    pub fn depth(self) -> usize {
        match self {
            HeadingLevel::Large => 0,
            HeadingLevel::Medium => 1,
            HeadingLevel::Small => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Heading {
    pub level: HeadingLevel,
    pub title: String,
    pub anchor: String,
}
