use jiff::{
    ToSpan,
    civil::{Date, Weekday},
};

/// A date in a week numbering scheme whose weeks begin on an arbitrary
/// weekday.
///
/// `jiff::civil::ISOWeekDate` always starts weeks on Monday. RFC 5545 lets
/// `WKST` pick any day, so BYWEEKNO expansion needs this generalization.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct WeekDate {
    start: Weekday,
    year: i16,
    week: i8,
    weekday: Weekday,
}

impl WeekDate {
    /// Create a new week date.
    ///
    /// `week` must be in `1..=53`, and `53` is only accepted for long years.
    /// Returns `None` when the week date has no corresponding Gregorian date
    /// in the supported range.
    pub(crate) fn new(
        start: Weekday,
        year: i16,
        week: i8,
        weekday: Weekday,
    ) -> Option<WeekDate> {
        if !(1..=weeks_in_year(start, year)).contains(&week) {
            return None;
        }
        let wd = WeekDate { start, year, week, weekday };
        wd.try_date()?;
        Some(wd)
    }

    /// Converts this week date to its Gregorian date.
    pub(crate) fn date(self) -> Date {
        // Construction guarantees this succeeds.
        self.try_date().unwrap_or(Date::MAX)
    }

    fn try_date(self) -> Option<Date> {
        let start_of_year = week_start_of_year(self.start, self.year)?;
        let days = i32::from(self.week - 1) * 7
            + i32::from(self.weekday.since(self.start));
        start_of_year.checked_add(days.days()).ok()
    }
}

/// Returns the number of weeks in `year` when weeks start on `start`.
///
/// Week one is the first week with at least four days in the year, so a
/// year has 53 weeks only when it ends three (or, in leap years, four)
/// days after a week start.
pub(crate) fn weeks_in_year(start: Weekday, year: i16) -> i8 {
    let Ok(last) = Date::new(year, 12, 31) else { return 52 };
    let weekday = last.weekday();
    if weekday == start.wrapping_add(3)
        || (last.in_leap_year() && weekday == start.wrapping_add(4))
    {
        53
    } else {
        52
    }
}

/// Returns the first day of the week containing `date`.
pub(crate) fn first_of_week(start: Weekday, date: Date) -> Option<Date> {
    if date.weekday() == start {
        return Some(date);
    }
    date.nth_weekday(-1, start).ok()
}

/// Returns the last day of the week containing `date`.
pub(crate) fn last_of_week(start: Weekday, date: Date) -> Option<Date> {
    let last = start.wrapping_sub(1);
    if date.weekday() == last {
        return Some(date);
    }
    date.nth_weekday(1, last).ok()
}

/// Returns the first date of week one of `year`.
///
/// January 4 is always in week one, so week one starts on the nearest
/// `start` weekday on or before it.
fn week_start_of_year(start: Weekday, year: i16) -> Option<Date> {
    let jan4 = Date::new(year, 1, 4).ok()?;
    let back = jan4.weekday().since(start);
    jan4.checked_sub(back.days()).ok()
}
