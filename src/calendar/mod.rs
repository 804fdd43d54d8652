//! Trading calendar: which business date a holding-change query refers to.
//!
//! Weekends are the only non-trading days modelled; exchange holidays are not.
//! Same-day holding data is only trusted after the morning data cutoff, so a
//! query made before it looks at the previous trading day.

use anyhow::{Context, Result};
use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use crate::config::CalendarConfig;

#[derive(Debug, Clone, Copy)]
pub struct TradingCalendar {
    cutoff: NaiveTime,
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self {
            cutoff: NaiveTime::from_hms_opt(8, 30, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl TradingCalendar {
    pub fn new(cutoff: NaiveTime) -> Self {
        Self { cutoff }
    }

    pub fn from_config(config: &CalendarConfig) -> Result<Self> {
        let cutoff = NaiveTime::parse_from_str(config.data_cutoff.trim(), "%H:%M")
            .with_context(|| format!("Invalid data_cutoff {:?}, expected HH:MM", config.data_cutoff))?;
        Ok(Self::new(cutoff))
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Nearest trading day strictly before `date`.
    pub fn last_trading_day_before(&self, date: NaiveDate) -> NaiveDate {
        let mut day = date;
        loop {
            day = day.pred_opt().unwrap_or(NaiveDate::MIN);
            if self.is_trading_day(day) || day == NaiveDate::MIN {
                return day;
            }
        }
    }

    /// Business date holding changes should be read for, `days_back` calendar
    /// days before `now`.
    pub fn target_date(&self, days_back: u32, now: NaiveDateTime) -> NaiveDate {
        let base = now
            .date()
            .checked_sub_days(Days::new(u64::from(days_back)))
            .unwrap_or(NaiveDate::MIN);

        if now.time() < self.cutoff || !self.is_trading_day(base) {
            self.last_trading_day_before(base)
        } else {
            base
        }
    }

    /// Target dates for `days_back, days_back + 1, ..` over `window` offsets,
    /// most recent first, without repeats.
    pub fn target_dates(&self, days_back: u32, window: u32, now: NaiveDateTime) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = Vec::new();
        for offset in 0..window {
            let d = self.target_date(days_back + offset, now);
            if !dates.contains(&d) {
                dates.push(d);
            }
        }
        dates
    }
}
