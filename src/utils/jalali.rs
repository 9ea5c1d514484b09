use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Day offset of the first day of each Gregorian month in a common year
const MONTH_STARTS: [i32; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

/// Days in one 33-year Jalali leap cycle
const CYCLE_DAYS: i32 = 12053;

/// A date in the Solar Hijri (Jalali) calendar
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JalaliDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl JalaliDate {
    /// Integer `YYYYMMDD` form, as stored alongside comments and crawl records
    pub fn as_number(&self) -> i32 {
        self.year * 10_000 + self.month as i32 * 100 + self.day as i32
    }
}

impl From<NaiveDate> for JalaliDate {
    fn from(date: NaiveDate) -> Self {
        let (gy, gm, gd) = (date.year(), date.month() as usize, date.day() as i32);

        // Leap day correction counts the current year once March has started
        let gy2 = if gm > 2 { gy + 1 } else { gy };
        let mut days = 355_666 + 365 * gy
            + (gy2 + 3).div_euclid(4)
            - (gy2 + 99).div_euclid(100)
            + (gy2 + 399).div_euclid(400)
            + gd
            + MONTH_STARTS[gm - 1];

        let mut year = -1595 + 33 * days.div_euclid(CYCLE_DAYS);
        days = days.rem_euclid(CYCLE_DAYS);

        year += 4 * days.div_euclid(1461);
        days = days.rem_euclid(1461);

        if days > 365 {
            year += (days - 1) / 365;
            days = (days - 1) % 365;
        }

        // Six 31-day months, then 30-day months (Esfand 29 or 30)
        let (month, day) = if days < 186 {
            (1 + days / 31, 1 + days % 31)
        } else {
            (7 + (days - 186) / 30, 1 + (days - 186) % 30)
        };

        Self {
            year,
            month: month as u32,
            day: day as u32,
        }
    }
}

impl fmt::Display for JalaliDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}/{:02}/{:02}", self.year, self.month, self.day)
    }
}
