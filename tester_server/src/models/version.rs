//! versions: A grading window (`vMAJOR.MINOR`) inside a semester.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::versions;

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = versions)]
pub struct Version {
    pub semester_name: String,
    pub version_name: String,
    pub direct_input: bool,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
}

impl Version {
    /// Whether the window has opened at `now`.
    pub fn has_opened(&self, now: DateTime<Utc>) -> bool {
        self.date_from < now
    }

    /// Whether `now` falls inside `[date_from, date_to)`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.date_from <= now && now < self.date_to
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    #[test]
    fn window_is_half_open() {
        let from = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
        let to = from + Duration::days(7);
        let version = Version {
            semester_name: "BCC-2025-2".to_string(),
            version_name: "v1.0".to_string(),
            direct_input: false,
            date_from: from,
            date_to: to,
        };

        assert!(!version.is_open(from - Duration::seconds(1)));
        assert!(version.is_open(from));
        assert!(version.is_open(to - Duration::seconds(1)));
        assert!(!version.is_open(to));
    }
}
