// Copyright 2024 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Resolves `queuePopulator.cronRule` (spec.md §6) into a tick schedule.
//!
//! Backed by a real cron parser rather than a handful of special-cased
//! shapes, so rules like `"0 */5 * * * *"` or `"0 0 * * *"` resolve the same
//! way a user's crontab would expect.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use croner::Cron;

pub struct TickSchedule {
    cron: Cron,
}

impl TickSchedule {
    pub fn parse(rule: &str) -> Result<Self> {
        let cron: Cron = rule
            .trim()
            .parse()
            .with_context(|| format!("invalid cron rule: {rule:?}"))?;
        Ok(Self { cron })
    }

    /// Duration until the next occurrence strictly after `from`.
    pub fn next_delay(&self, from: DateTime<Utc>) -> Result<std::time::Duration> {
        let next = self
            .cron
            .find_next_occurrence(&from, false)
            .map_err(|e| anyhow::anyhow!("computing next occurrence: {e}"))?;
        Ok((next - from).to_std().unwrap_or(std::time::Duration::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn seconds_field_shorthand() {
        let s = TickSchedule::parse("*/5 * * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(s.next_delay(from).unwrap(), std::time::Duration::from_secs(5));
    }

    #[test]
    fn minute_field_rule() {
        let s = TickSchedule::parse("0 */5 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 2, 0).unwrap();
        assert_eq!(s.next_delay(from).unwrap(), std::time::Duration::from_secs(180));
    }

    #[test]
    fn five_field_daily_rule() {
        let s = TickSchedule::parse("0 0 * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(s.next_delay(from).unwrap(), std::time::Duration::from_secs(12 * 3600));
    }

    #[test]
    fn rejects_garbage() {
        assert!(TickSchedule::parse("whenever").is_err());
    }
}
