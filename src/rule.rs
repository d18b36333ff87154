/*!
Single recurrence rules and their RFC 5545 expansion.

A [`Rule`] is a frequency plus a set of "by" filters. It carries no starting
point of its own: the anchor (`DTSTART`) is supplied when iterating with
[`Rule::iter`], which lets the same rule be expanded from different starts.

Expansion works one period at a time. For each period (a year, a month, a
week and so on, stepped by the rule's interval from the anchor), the filters
either *expand* the period into a set of candidate datetimes or *limit* the
candidates already present, following the table in RFC 5545 section 3.3.10.
BYSETPOS is then applied to the sorted candidates of that period.
*/

use std::{
    cmp::Ordering,
    ops::{Range, RangeInclusive},
    sync::Arc,
};

use jiff::{
    Span, ToSpan,
    civil::{Date, DateTime, Time, Weekday},
};

use crate::{
    error::{ByPart, ConstructionError, FormatReason},
    stamp::Stamp,
    weekdate::{WeekDate, first_of_week, last_of_week, weeks_in_year},
};

/// An immutable, validated RFC 5545 recurrence rule.
///
/// Cloning a rule is cheap. Two rules are equal when all of their parts are
/// equal, with every filter compared as a sorted set.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Rule {
    inner: Arc<RuleInner>,
}

#[derive(Debug, Eq, Hash, PartialEq)]
struct RuleInner {
    freq: Frequency,
    interval: i32,
    count: Option<u32>,
    until: Option<Stamp>,
    by_month: Box<[i8]>,
    // The rest of these can be negative, except for the times.
    by_week: Box<[i8]>,
    by_year_day: Box<[i16]>,
    by_month_day: Box<[i8]>,
    by_week_day: Box<[ByWeekday]>,
    by_hour: Box<[i8]>,
    by_minute: Box<[i8]>,
    by_second: Box<[i8]>,
    by_set_pos: Box<[i32]>,
    week_start: Weekday,
}

impl Rule {
    /// Returns a builder for a rule with the given frequency.
    pub fn builder(freq: Frequency) -> RuleBuilder {
        RuleBuilder::new(freq)
    }

    /// Returns an iterator over every datetime of this rule anchored at
    /// `start`.
    ///
    /// Without a `count` or `until`, the iterator runs all the way to the
    /// maximum supported datetime. Use [`RuleIter::before`] or `take` to
    /// bound it.
    pub fn iter(&self, start: DateTime) -> RuleIter<'_> {
        RuleIter::new(self, start)
    }

    pub fn frequency(&self) -> Frequency {
        self.inner.freq
    }

    pub fn interval(&self) -> i32 {
        self.inner.interval
    }

    pub fn count(&self) -> Option<u32> {
        self.inner.count
    }

    pub fn until(&self) -> Option<Stamp> {
        self.inner.until
    }

    pub fn by_month(&self) -> &[i8] {
        &self.inner.by_month
    }

    pub fn by_week(&self) -> &[i8] {
        &self.inner.by_week
    }

    pub fn by_year_day(&self) -> &[i16] {
        &self.inner.by_year_day
    }

    pub fn by_month_day(&self) -> &[i8] {
        &self.inner.by_month_day
    }

    pub fn by_week_day(&self) -> &[ByWeekday] {
        &self.inner.by_week_day
    }

    pub fn by_hour(&self) -> &[i8] {
        &self.inner.by_hour
    }

    pub fn by_minute(&self) -> &[i8] {
        &self.inner.by_minute
    }

    pub fn by_second(&self) -> &[i8] {
        &self.inner.by_second
    }

    pub fn by_set_position(&self) -> &[i32] {
        &self.inner.by_set_pos
    }

    pub fn week_start(&self) -> Weekday {
        self.inner.week_start
    }
}

impl RuleInner {
    /// Whether the day of a period is picked by the filters rather than
    /// copied from the anchor.
    ///
    /// When it isn't, a period whose anchor day was clamped by span
    /// arithmetic (Jan 31 plus one month is Feb 28) must be skipped, since
    /// RFC 5545 treats Feb 31 as nonexistent rather than as Feb 28.
    fn chooses_day(&self) -> bool {
        match self.freq {
            Frequency::Yearly => {
                !self.by_month.is_empty()
                    || !self.by_week.is_empty()
                    || !self.by_year_day.is_empty()
                    || !self.by_month_day.is_empty()
                    || !self.by_week_day.is_empty()
            }
            Frequency::Monthly => {
                !self.by_month_day.is_empty() || !self.by_week_day.is_empty()
            }
            _ => true,
        }
    }

    /// Returns the earliest datetime that expanding the period containing
    /// `dt` can produce.
    fn period_floor(&self, dt: DateTime) -> DateTime {
        let midnight = |date: Date| date.to_datetime(Time::midnight());
        match self.freq {
            // Week one of a year can begin in the last days of December.
            Frequency::Yearly => midnight(dt.date().first_of_year())
                .checked_sub(7.days())
                .unwrap_or(DateTime::MIN),
            Frequency::Monthly => midnight(dt.date().first_of_month()),
            Frequency::Weekly => first_of_week(self.week_start, dt.date())
                .map(midnight)
                .unwrap_or(DateTime::MIN),
            Frequency::Daily => midnight(dt.date()),
            Frequency::Hourly => dt
                .with()
                .minute(0)
                .second(0)
                .subsec_nanosecond(0)
                .build()
                .unwrap_or(dt),
            Frequency::Minutely => {
                dt.with().second(0).subsec_nanosecond(0).build().unwrap_or(dt)
            }
            Frequency::Secondly => dt,
        }
    }
}

/// Fills a candidate set for one period of one rule.
#[derive(Clone, Debug)]
struct Expander<'a> {
    rule: &'a RuleInner,
    /// The anchor of the whole iteration.
    start: DateTime,
    /// The anchor of the period being expanded.
    cur: DateTime,
}

impl<'a> Expander<'a> {
    fn expand(&self, set: &mut RecurrenceSet) {
        match self.rule.freq {
            Frequency::Yearly => self.yearly(set),
            Frequency::Monthly => self.monthly(set),
            Frequency::Weekly => self.weekly(set),
            Frequency::Daily => self.daily(set),
            Frequency::Hourly => self.hourly(set),
            Frequency::Minutely => self.minutely(set),
            Frequency::Secondly => self.secondly(set),
        }
        set.canonicalize();
        // Negative positions count from the end of the period, so this can
        // only happen once the whole period is known. Candidates before the
        // anchor still occupy a position.
        if !self.rule.by_set_pos.is_empty() {
            set.select_positions(&self.rule.by_set_pos);
        }
    }

    fn yearly(&self, set: &mut RecurrenceSet) {
        let r = self.rule;
        set.insert(self.cur);
        if !r.by_week_day.is_empty() {
            if !r.by_week.is_empty() {
                set.expand(|dt| self.weeks(dt));
                set.expand(|dt| self.week_days_in_week(dt));
                set.retain(|dt| self.month_ok(dt));
            } else if !r.by_month.is_empty() {
                set.expand(|dt| self.months(dt));
                set.expand(|dt| self.week_days_in_month(dt));
            } else {
                set.expand(|dt| self.week_days_in_year(dt));
            }
            set.retain(|dt| self.year_day_ok(dt) && self.month_day_ok(dt));
        } else if !r.by_week.is_empty() {
            // Without BYDAY, a selected week contributes all seven of its
            // days, the same as python-dateutil.
            set.expand(|dt| self.weeks(dt));
            set.expand(|dt| {
                (0..7).filter_map(move |n| dt.checked_add(n.days()).ok())
            });
            set.retain(|dt| {
                self.month_ok(dt)
                    && self.year_day_ok(dt)
                    && self.month_day_ok(dt)
            });
        } else if !r.by_month.is_empty() {
            set.expand(|dt| self.months(dt));
            if !r.by_month_day.is_empty() {
                set.expand(|dt| self.month_days(dt));
            }
            set.retain(|dt| self.year_day_ok(dt));
        } else if !r.by_month_day.is_empty() {
            set.expand(|dt| {
                (1..=12).filter_map(move |month| {
                    dt.with().month(month).day(1).build().ok()
                })
            });
            set.expand(|dt| self.month_days(dt));
            set.retain(|dt| self.year_day_ok(dt));
        } else if !r.by_year_day.is_empty() {
            set.expand(|dt| self.year_days(dt));
        }
        self.expand_times(set);
    }

    fn monthly(&self, set: &mut RecurrenceSet) {
        if !self.month_ok(self.cur) {
            return;
        }
        set.insert(self.cur);
        if !self.rule.by_week_day.is_empty() {
            set.expand(|dt| self.week_days_in_month(dt));
            set.retain(|dt| self.month_day_ok(dt));
        } else if !self.rule.by_month_day.is_empty() {
            set.expand(|dt| self.month_days(dt));
        }
        self.expand_times(set);
    }

    fn weekly(&self, set: &mut RecurrenceSet) {
        set.insert(self.cur);
        if !self.rule.by_week_day.is_empty() {
            set.expand(|dt| self.week_days_in_week(dt));
        }
        // A week can straddle two months, so BYMONTH limits days, not weeks.
        set.retain(|dt| self.month_ok(dt));
        self.expand_times(set);
    }

    fn daily(&self, set: &mut RecurrenceSet) {
        if !self.day_ok(self.cur) {
            return;
        }
        set.insert(self.cur);
        self.expand_times(set);
    }

    fn hourly(&self, set: &mut RecurrenceSet) {
        if !self.day_ok(self.cur) || !self.hour_ok(self.cur) {
            return;
        }
        set.insert(self.cur);
        if !self.rule.by_minute.is_empty() {
            set.expand(|dt| self.minutes(dt));
        }
        if !self.rule.by_second.is_empty() {
            set.expand(|dt| self.seconds(dt));
        }
    }

    fn minutely(&self, set: &mut RecurrenceSet) {
        let cur = self.cur;
        if !self.day_ok(cur) || !self.hour_ok(cur) || !self.minute_ok(cur) {
            return;
        }
        set.insert(cur);
        if !self.rule.by_second.is_empty() {
            set.expand(|dt| self.seconds(dt));
        }
    }

    fn secondly(&self, set: &mut RecurrenceSet) {
        let cur = self.cur;
        if !self.day_ok(cur)
            || !self.hour_ok(cur)
            || !self.minute_ok(cur)
            || !self.second_ok(cur)
        {
            return;
        }
        set.insert(cur);
    }

    /// Expands BYHOUR, BYMINUTE and BYSECOND, which behave the same way at
    /// YEARLY through DAILY frequency.
    fn expand_times(&self, set: &mut RecurrenceSet) {
        let r = self.rule;
        if !r.by_hour.is_empty() {
            set.expand(|dt| self.hours(dt));
        }
        if !r.by_minute.is_empty() {
            set.expand(|dt| self.minutes(dt));
        }
        if !r.by_second.is_empty() {
            set.expand(|dt| self.seconds(dt));
        }
    }

    /// Every date-level limit at once. Filters that construction forbids at
    /// the rule's frequency are empty and always pass.
    fn day_ok(&self, dt: DateTime) -> bool {
        self.month_ok(dt)
            && self.year_day_ok(dt)
            && self.month_day_ok(dt)
            && self.week_day_ok(dt)
    }

    fn month_ok(&self, dt: DateTime) -> bool {
        self.rule.by_month.is_empty() || self.rule.by_month.contains(&dt.month())
    }

    fn year_day_ok(&self, dt: DateTime) -> bool {
        self.rule.by_year_day.is_empty()
            || selects(
                &self.rule.by_year_day,
                i32::from(dt.day_of_year()),
                i32::from(dt.days_in_year()),
            )
    }

    fn month_day_ok(&self, dt: DateTime) -> bool {
        self.rule.by_month_day.is_empty()
            || selects(
                &self.rule.by_month_day,
                i32::from(dt.day()),
                i32::from(dt.days_in_month()),
            )
    }

    /// Numbered weekdays never reach this (they are only permitted where
    /// BYDAY expands), so they simply don't match.
    fn week_day_ok(&self, dt: DateTime) -> bool {
        let wd = dt.weekday();
        self.rule.by_week_day.is_empty()
            || self
                .rule
                .by_week_day
                .iter()
                .any(|&bywd| bywd == ByWeekday::Any(wd))
    }

    fn hour_ok(&self, dt: DateTime) -> bool {
        self.rule.by_hour.is_empty() || self.rule.by_hour.contains(&dt.hour())
    }

    fn minute_ok(&self, dt: DateTime) -> bool {
        self.rule.by_minute.is_empty()
            || self.rule.by_minute.contains(&dt.minute())
    }

    fn second_ok(&self, dt: DateTime) -> bool {
        self.rule.by_second.is_empty()
            || self.rule.by_second.contains(&dt.second())
    }

    /// Moves `dt` into each BYMONTH month.
    ///
    /// The day comes from the anchor unless a later filter picks the day,
    /// in which case the first of the month stands in so that short months
    /// aren't dropped before the day is chosen.
    fn months(&self, dt: DateTime) -> impl Iterator<Item = DateTime> {
        let day = if self.rule.by_month_day.is_empty()
            && self.rule.by_week_day.is_empty()
        {
            self.start.day()
        } else {
            1
        };
        self.rule.by_month.iter().filter_map(move |&month| {
            dt.with().month(month).day(day).build().ok()
        })
    }

    /// Moves `dt` to the first day of each BYWEEKNO week of its year.
    fn weeks(&self, dt: DateTime) -> impl Iterator<Item = DateTime> {
        let week_start = self.rule.week_start;
        let year = dt.year();
        let total = weeks_in_year(week_start, year);
        self.rule.by_week.iter().filter_map(move |&week| {
            let week = if week < 0 { total + week + 1 } else { week };
            let date = WeekDate::new(week_start, year, week, week_start)?;
            dt.with().date(date.date()).build().ok()
        })
    }

    fn year_days(&self, dt: DateTime) -> impl Iterator<Item = DateTime> {
        let len = dt.days_in_year();
        self.rule.by_year_day.iter().filter_map(move |&day| {
            let day = if day < 0 { len + day + 1 } else { day };
            dt.with().day_of_year(day).build().ok()
        })
    }

    fn month_days(&self, dt: DateTime) -> impl Iterator<Item = DateTime> {
        let len = dt.days_in_month();
        self.rule.by_month_day.iter().filter_map(move |&day| {
            let day = if day < 0 { len + day + 1 } else { day };
            dt.with().day(day).build().ok()
        })
    }

    fn week_days_in_year(
        &self,
        dt: DateTime,
    ) -> impl Iterator<Item = DateTime> {
        let (first, last) = (dt.first_of_year(), dt.last_of_year());
        self.rule
            .by_week_day
            .iter()
            .flat_map(move |bywd| bywd.within(first, last))
    }

    fn week_days_in_month(
        &self,
        dt: DateTime,
    ) -> impl Iterator<Item = DateTime> {
        let (first, last) = (dt.first_of_month(), dt.last_of_month());
        self.rule.by_week_day.iter().flat_map(move |&bywd| match bywd {
            ByWeekday::Any(weekday) => {
                Either::Left(weekdays_between(weekday, first, last))
            }
            ByWeekday::Numbered { nth, weekday } => Either::Right(
                first.nth_weekday_of_month(nth, weekday).ok().into_iter(),
            ),
        })
    }

    fn week_days_in_week(
        &self,
        dt: DateTime,
    ) -> impl Iterator<Item = DateTime> {
        let week_start = self.rule.week_start;
        let bounds = first_of_week(week_start, dt.date())
            .zip(last_of_week(week_start, dt.date()))
            .and_then(|(first, last)| {
                let first = dt.with().date(first).build().ok()?;
                let last = dt.with().date(last).build().ok()?;
                Some((first, last))
            });
        bounds.into_iter().flat_map(move |(first, last)| {
            self.rule.by_week_day.iter().flat_map(move |&bywd| match bywd {
                ByWeekday::Any(weekday) => {
                    Either::Left(weekdays_between(weekday, first, last))
                }
                ByWeekday::Numbered { .. } => Either::Right(std::iter::empty()),
            })
        })
    }

    fn hours(&self, dt: DateTime) -> impl Iterator<Item = DateTime> {
        self.rule
            .by_hour
            .iter()
            .filter_map(move |&hour| dt.with().hour(hour).build().ok())
    }

    fn minutes(&self, dt: DateTime) -> impl Iterator<Item = DateTime> {
        self.rule
            .by_minute
            .iter()
            .filter_map(move |&minute| dt.with().minute(minute).build().ok())
    }

    fn seconds(&self, dt: DateTime) -> impl Iterator<Item = DateTime> {
        self.rule
            .by_second
            .iter()
            .filter_map(move |&second| dt.with().second(second).build().ok())
    }
}

/// Reports whether the 1-indexed `position` out of `len` is selected, where
/// negative values count back from the end (`-1` is the last).
fn selects<T: Copy + Into<i32>>(values: &[T], position: i32, len: i32) -> bool {
    let from_end = position - 1 - len;
    values.iter().any(|&v| {
        let v = v.into();
        v == position || v == from_end
    })
}

/// An iterator over the datetimes of a single rule.
///
/// This is created by [`Rule::iter`].
#[derive(Clone, Debug)]
pub struct RuleIter<'r> {
    rule: &'r Rule,
    start: DateTime,
    /// One interval of the rule's frequency.
    interval: Span,
    /// Candidates of the current period waiting to be emitted.
    set: RecurrenceSet,
    /// The number of intervals from `start`, along with the anchor of the
    /// next period to expand.
    ///
    /// Each period is computed as `start + interval * n` rather than by
    /// adding to the previous period, since clamping is sticky: Jan 31 plus
    /// one month is Feb 28, and Feb 28 plus one month is Mar 28.
    ///
    /// `None` once there are no more periods.
    cur: Option<(i64, DateTime)>,
    emitted: u32,
    /// An exclusive bound past which nothing is produced.
    horizon: Option<DateTime>,
}

impl<'r> RuleIter<'r> {
    fn new(rule: &'r Rule, start: DateTime) -> RuleIter<'r> {
        let interval = rule.inner.freq.to_span(rule.inner.interval);
        let cur = match interval {
            Some(_) if rule.inner.count != Some(0) => Some((0, start)),
            _ => None,
        };
        log::trace!(
            "expanding {freq} rule from {start}",
            freq = rule.inner.freq,
        );
        RuleIter {
            rule,
            start,
            interval: interval.unwrap_or_else(Span::new),
            set: RecurrenceSet::default(),
            cur,
            emitted: 0,
            horizon: None,
        }
    }

    /// Stop producing datetimes at `end` (exclusive).
    ///
    /// Unlike a `take_while`, this also stops expanding periods that start
    /// at or after `end`, so a rule whose filters never match still
    /// terminates.
    pub fn before(mut self, end: DateTime) -> RuleIter<'r> {
        self.horizon = Some(end);
        self
    }

    /// Returns the next datetime only if it is at or before `limit`.
    ///
    /// When the next datetime is after `limit`, this returns `None` without
    /// consuming anything, and a later call with a greater limit picks up
    /// where this left off. Periods that begin after `limit` are not
    /// expanded, so this never runs ahead of the caller.
    pub(crate) fn next_through(
        &mut self,
        limit: DateTime,
    ) -> Option<DateTime> {
        loop {
            if self.rule.inner.count.is_some_and(|count| self.emitted >= count)
            {
                self.finish();
                return None;
            }
            if let Some(dt) = self.set.last() {
                if dt < self.start {
                    self.set.pop();
                    continue;
                }
                if self.is_past_end(dt) {
                    self.finish();
                    return None;
                }
                if dt > limit {
                    return None;
                }
                self.set.pop();
                self.emitted += 1;
                return Some(dt);
            }
            let (_, cur) = self.cur?;
            if self.rule.inner.period_floor(cur) > limit {
                return None;
            }
            Expander { rule: &self.rule.inner, start: self.start, cur }
                .expand(&mut self.set);
            self.cur = self.increment();
        }
    }

    fn is_past_end(&self, dt: DateTime) -> bool {
        self.rule.inner.until.is_some_and(|until| dt > until.datetime())
            || self.horizon.is_some_and(|horizon| dt >= horizon)
    }

    fn finish(&mut self) {
        self.set.clear();
        self.cur = None;
    }

    fn increment(&self) -> Option<(i64, DateTime)> {
        let (mut attempt, _) = self.cur?;
        let r = &self.rule.inner;
        loop {
            attempt = attempt.checked_add(1)?;
            let span = self.interval.checked_mul(attempt).ok()?;
            let next = self.start.checked_add(span).ok()?;
            // Stopping here rather than only when popping bounds the work
            // for rules whose periods are mostly empty.
            let floor = r.period_floor(next);
            if self.is_past_end(floor) {
                return None;
            }
            if next.day() != self.start.day() && !r.chooses_day() {
                continue;
            }
            return Some((attempt, next));
        }
    }
}

impl<'r> Iterator for RuleIter<'r> {
    type Item = DateTime;

    fn next(&mut self) -> Option<DateTime> {
        self.next_through(DateTime::MAX)
    }
}

impl<'r> std::iter::FusedIterator for RuleIter<'r> {}

/// A builder for a [`Rule`].
///
/// Every setter can be called more than once. Filters accumulate, so
/// `by_month(1).by_month(6)` is the same as `by_month([1, 6])`. Calling a
/// filter setter declares that filter, and a declared filter that ends up
/// with no values is an error.
#[derive(Clone, Debug)]
pub struct RuleBuilder {
    freq: Frequency,
    interval: i32,
    count: Option<u32>,
    until: Option<Stamp>,
    by_month: Vec<i8>,
    by_week: Vec<i8>,
    by_year_day: Vec<i16>,
    by_month_day: Vec<i8>,
    by_week_day: Vec<ByWeekday>,
    by_hour: Vec<i8>,
    by_minute: Vec<i8>,
    by_second: Vec<i8>,
    by_set_pos: Vec<i32>,
    week_start: Weekday,
    declared: Vec<ByPart>,
}

impl RuleBuilder {
    fn new(freq: Frequency) -> RuleBuilder {
        RuleBuilder {
            freq,
            interval: 1,
            count: None,
            until: None,
            by_month: vec![],
            by_week: vec![],
            by_year_day: vec![],
            by_month_day: vec![],
            by_week_day: vec![],
            by_hour: vec![],
            by_minute: vec![],
            by_second: vec![],
            by_set_pos: vec![],
            week_start: Weekday::Monday,
            declared: vec![],
        }
    }

    fn declare(&mut self, part: ByPart) {
        if !self.declared.contains(&part) {
            self.declared.push(part);
        }
    }

    fn is_empty(&self, part: ByPart) -> bool {
        match part {
            ByPart::Month => self.by_month.is_empty(),
            ByPart::Week => self.by_week.is_empty(),
            ByPart::YearDay => self.by_year_day.is_empty(),
            ByPart::MonthDay => self.by_month_day.is_empty(),
            ByPart::WeekDay => self.by_week_day.is_empty(),
            ByPart::Hour => self.by_hour.is_empty(),
            ByPart::Minute => self.by_minute.is_empty(),
            ByPart::Second => self.by_second.is_empty(),
            ByPart::SetPosition => self.by_set_pos.is_empty(),
        }
    }

    /// Validates everything given to this builder and returns a rule.
    pub fn build(&self) -> Result<Rule, ConstructionError> {
        fn sorted<T: Clone + Ord>(values: &[T]) -> Box<[T]> {
            let mut vec = values.to_vec();
            vec.sort();
            vec.dedup();
            vec.into_boxed_slice()
        }

        if self.interval < 1 {
            return Err(ConstructionError::Interval(self.interval));
        }
        if self.count.is_some() && self.until.is_some() {
            return Err(ConstructionError::CountAndUntil);
        }
        if let Some(&part) =
            self.declared.iter().find(|&&part| self.is_empty(part))
        {
            return Err(ConstructionError::EmptyFilter { part });
        }
        check_range(ByPart::Month, &self.by_month, 1, 12)?;
        check_signed(ByPart::Week, &self.by_week, 53)?;
        check_signed(ByPart::YearDay, &self.by_year_day, 366)?;
        check_signed(ByPart::MonthDay, &self.by_month_day, 31)?;
        self.check_week_days()?;
        check_range(ByPart::Hour, &self.by_hour, 0, 23)?;
        check_range(ByPart::Minute, &self.by_minute, 0, 59)?;
        // RFC 5545 permits 60 for leap seconds, which civil datetimes can't
        // represent.
        check_range(ByPart::Second, &self.by_second, 0, 59)?;
        check_signed(ByPart::SetPosition, &self.by_set_pos, 366)?;

        let conflict = |part| ConstructionError::FrequencyConflict {
            part,
            freq: self.freq,
        };
        if !self.by_week.is_empty() && self.freq != Frequency::Yearly {
            return Err(conflict(ByPart::Week));
        }
        if !self.by_year_day.is_empty()
            && matches!(
                self.freq,
                Frequency::Monthly | Frequency::Weekly | Frequency::Daily
            )
        {
            return Err(conflict(ByPart::YearDay));
        }
        if !self.by_month_day.is_empty() && self.freq == Frequency::Weekly {
            return Err(conflict(ByPart::MonthDay));
        }
        if !self.by_set_pos.is_empty()
            && self.by_month.is_empty()
            && self.by_week.is_empty()
            && self.by_year_day.is_empty()
            && self.by_month_day.is_empty()
            && self.by_week_day.is_empty()
            && self.by_hour.is_empty()
            && self.by_minute.is_empty()
            && self.by_second.is_empty()
        {
            return Err(ConstructionError::SetPositionAlone);
        }
        if self.freq.to_span(self.interval).is_none() {
            return Err(ConstructionError::IntervalSpan {
                freq: self.freq,
                interval: self.interval,
            });
        }

        let inner = Arc::new(RuleInner {
            freq: self.freq,
            interval: self.interval,
            count: self.count,
            until: self.until,
            by_month: sorted(&self.by_month),
            by_week: sorted(&self.by_week),
            by_year_day: sorted(&self.by_year_day),
            by_month_day: sorted(&self.by_month_day),
            by_week_day: sorted(&self.by_week_day),
            by_hour: sorted(&self.by_hour),
            by_minute: sorted(&self.by_minute),
            by_second: sorted(&self.by_second),
            by_set_pos: sorted(&self.by_set_pos),
            week_start: self.week_start,
        });
        Ok(Rule { inner })
    }

    /// Numbered weekdays are only meaningful when BYDAY expands within a
    /// month or a year, and the ordinal range depends on which.
    fn check_week_days(&self) -> Result<(), ConstructionError> {
        for &weekday in self.by_week_day.iter() {
            let ByWeekday::Numbered { nth, .. } = weekday else { continue };
            if !matches!(self.freq, Frequency::Yearly | Frequency::Monthly) {
                return Err(ConstructionError::NumberedWeekday(weekday));
            }
            if self.freq == Frequency::Yearly && !self.by_week.is_empty() {
                return Err(ConstructionError::NumberedWeekdayWithWeek(
                    weekday,
                ));
            }
            let (max, range) = if self.freq == Frequency::Yearly
                && self.by_month.is_empty()
            {
                (53, "1..=53 or -53..=-1")
            } else {
                (5, "1..=5 or -5..=-1")
            };
            if nth == 0 || nth.unsigned_abs() > max {
                return Err(ConstructionError::NumberedWeekdayRange {
                    weekday,
                    range,
                });
            }
        }
        Ok(())
    }

    pub fn interval(&mut self, interval: i32) -> &mut RuleBuilder {
        self.interval = interval;
        self
    }

    pub fn count(&mut self, count: u32) -> &mut RuleBuilder {
        self.count = Some(count);
        self
    }

    pub fn until(&mut self, until: impl Into<Stamp>) -> &mut RuleBuilder {
        self.until = Some(until.into());
        self
    }

    pub fn by_month<I: IntoI8Iter>(&mut self, months: I) -> &mut RuleBuilder {
        self.declare(ByPart::Month);
        self.by_month.extend(months.into_i8_iter());
        self
    }

    pub fn by_week<I: IntoI8Iter>(&mut self, weeks: I) -> &mut RuleBuilder {
        self.declare(ByPart::Week);
        self.by_week.extend(weeks.into_i8_iter());
        self
    }

    pub fn by_year_day<I: IntoI16Iter>(
        &mut self,
        days: I,
    ) -> &mut RuleBuilder {
        self.declare(ByPart::YearDay);
        self.by_year_day.extend(days.into_i16_iter());
        self
    }

    pub fn by_month_day<I: IntoI8Iter>(
        &mut self,
        days: I,
    ) -> &mut RuleBuilder {
        self.declare(ByPart::MonthDay);
        self.by_month_day.extend(days.into_i8_iter());
        self
    }

    pub fn by_week_day<I: IntoByWeekdayIter>(
        &mut self,
        weekdays: I,
    ) -> &mut RuleBuilder {
        self.declare(ByPart::WeekDay);
        self.by_week_day.extend(weekdays.into_by_weekday_iter());
        self
    }

    pub fn by_hour<I: IntoI8Iter>(&mut self, hours: I) -> &mut RuleBuilder {
        self.declare(ByPart::Hour);
        self.by_hour.extend(hours.into_i8_iter());
        self
    }

    pub fn by_minute<I: IntoI8Iter>(
        &mut self,
        minutes: I,
    ) -> &mut RuleBuilder {
        self.declare(ByPart::Minute);
        self.by_minute.extend(minutes.into_i8_iter());
        self
    }

    pub fn by_second<I: IntoI8Iter>(
        &mut self,
        seconds: I,
    ) -> &mut RuleBuilder {
        self.declare(ByPart::Second);
        self.by_second.extend(seconds.into_i8_iter());
        self
    }

    pub fn by_set_position<I: IntoI32Iter>(
        &mut self,
        positions: I,
    ) -> &mut RuleBuilder {
        self.declare(ByPart::SetPosition);
        self.by_set_pos.extend(positions.into_i32_iter());
        self
    }

    pub fn week_start(&mut self, weekday: Weekday) -> &mut RuleBuilder {
        self.week_start = weekday;
        self
    }
}

fn check_range<T: Copy + Into<i64>>(
    part: ByPart,
    values: &[T],
    min: i64,
    max: i64,
) -> Result<(), ConstructionError> {
    let range = match part {
        ByPart::Month => "1..=12",
        ByPart::Hour => "0..=23",
        _ => "0..=59",
    };
    for &v in values {
        let value = v.into();
        if !(min..=max).contains(&value) {
            return Err(ConstructionError::OutOfRange { part, value, range });
        }
    }
    Ok(())
}

fn check_signed<T: Copy + Into<i64>>(
    part: ByPart,
    values: &[T],
    max: i64,
) -> Result<(), ConstructionError> {
    let range = match max {
        31 => "1..=31 or -31..=-1",
        53 => "1..=53 or -53..=-1",
        _ => "1..=366 or -366..=-1",
    };
    for &v in values {
        let value = v.into();
        if value == 0 || value.abs() > max {
            return Err(ConstructionError::OutOfRange { part, value, range });
        }
    }
    Ok(())
}

/// Candidate datetimes for a single period.
///
/// Stored in descending order so that the next datetime to emit is popped
/// from the end.
#[derive(Clone, Debug, Default)]
struct RecurrenceSet {
    descending: Vec<DateTime>,
}

impl RecurrenceSet {
    fn insert(&mut self, dt: DateTime) {
        self.descending.push(dt);
    }

    fn last(&self) -> Option<DateTime> {
        self.descending.last().copied()
    }

    fn pop(&mut self) -> Option<DateTime> {
        self.descending.pop()
    }

    fn clear(&mut self) {
        self.descending.clear();
    }

    fn retain(&mut self, mut predicate: impl FnMut(DateTime) -> bool) {
        self.descending.retain(|&dt| predicate(dt));
    }

    /// Replaces every datetime in the set with its expansion.
    fn expand<E, I>(&mut self, expand: E)
    where
        E: Fn(DateTime) -> I,
        I: Iterator<Item = DateTime>,
    {
        let len = self.descending.len();
        for i in 0..len {
            let dt = self.descending[i];
            self.descending.extend(expand(dt));
        }
        self.descending.drain(..len);
    }

    fn canonicalize(&mut self) {
        self.descending.sort_by(|dt1, dt2| dt2.cmp(dt1));
        self.descending.dedup();
    }

    /// Keeps only the datetimes at the given BYSETPOS positions.
    fn select_positions(&mut self, positions: &[i32]) {
        let Ok(len) = i32::try_from(self.descending.len()) else {
            self.clear();
            return;
        };
        // Index `i` of the descending vector is ascending position `len - i`.
        let mut i = 0;
        self.descending.retain(|_| {
            let keep = selects(positions, len - i, len);
            i += 1;
            keep
        });
    }
}

/// A trait that permits flexibly specifying a sequence of `i8` integers.
///
/// This trait is used for builder methods on `RuleBuilder`. It permits
/// callers to provide integers in a number of flexible ways:
///
/// * A single integer: `5`
/// * An array of integers: `[1, 3, 5]`.
/// * A single range of integers: `5..8` or `5..=8`.
/// * An array of ranges of integers: `[5..=10, 15..=20]`.
///
/// There are separate traits for `i8`, `i16` and `i32` because a single
/// generic trait implemented for all three would make `by_month(5)`
/// ambiguous to type inference.
pub trait IntoI8Iter {
    /// Creates an iterator over all integers in this sequence.
    fn into_i8_iter(self) -> impl Iterator<Item = i8>;
}

/// Like [`IntoI8Iter`], but for `i16`.
pub trait IntoI16Iter {
    fn into_i16_iter(self) -> impl Iterator<Item = i16>;
}

/// Like [`IntoI8Iter`], but for `i32`.
pub trait IntoI32Iter {
    fn into_i32_iter(self) -> impl Iterator<Item = i32>;
}

macro_rules! impl_into_int_iter {
    ($trait:ident, $method:ident, $int:ty) => {
        impl $trait for $int {
            fn $method(self) -> impl Iterator<Item = $int> {
                std::iter::once(self)
            }
        }

        impl $trait for Range<$int> {
            fn $method(self) -> impl Iterator<Item = $int> {
                self
            }
        }

        impl $trait for RangeInclusive<$int> {
            fn $method(self) -> impl Iterator<Item = $int> {
                self
            }
        }

        impl<const N: usize> $trait for [$int; N] {
            fn $method(self) -> impl Iterator<Item = $int> {
                self.into_iter()
            }
        }

        impl<const N: usize> $trait for [Range<$int>; N] {
            fn $method(self) -> impl Iterator<Item = $int> {
                self.into_iter().flatten()
            }
        }

        impl<const N: usize> $trait for [RangeInclusive<$int>; N] {
            fn $method(self) -> impl Iterator<Item = $int> {
                self.into_iter().flatten()
            }
        }

        impl $trait for Vec<$int> {
            fn $method(self) -> impl Iterator<Item = $int> {
                self.into_iter()
            }
        }
    };
}

impl_into_int_iter!(IntoI8Iter, into_i8_iter, i8);
impl_into_int_iter!(IntoI16Iter, into_i16_iter, i16);
impl_into_int_iter!(IntoI32Iter, into_i32_iter, i32);

/// A trait that permits flexibly specifying a sequence of weekdays.
///
/// * A `ByWeekday` directly.
/// * Any weekday via `Weekday::Monday`.
/// * A numbered weekday via `(3, Weekday::Friday)`.
/// * A range of weekdays via `Weekday::Monday..=Weekday::Friday`.
/// * An array or `Vec` of any of the above.
pub trait IntoByWeekdayIter {
    fn into_by_weekday_iter(self) -> impl Iterator<Item = ByWeekday>;
}

impl IntoByWeekdayIter for ByWeekday {
    fn into_by_weekday_iter(self) -> impl Iterator<Item = ByWeekday> {
        std::iter::once(self)
    }
}

impl IntoByWeekdayIter for Weekday {
    fn into_by_weekday_iter(self) -> impl Iterator<Item = ByWeekday> {
        std::iter::once(ByWeekday::Any(self))
    }
}

impl IntoByWeekdayIter for (i8, Weekday) {
    fn into_by_weekday_iter(self) -> impl Iterator<Item = ByWeekday> {
        let (nth, weekday) = self;
        std::iter::once(ByWeekday::Numbered { nth, weekday })
    }
}

impl IntoByWeekdayIter for RangeInclusive<Weekday> {
    fn into_by_weekday_iter(self) -> impl Iterator<Item = ByWeekday> {
        let (start, end) = (*self.start(), *self.end());
        // `until` is always in `0..=6`.
        let count = 1 + usize::from(start.until(end).unsigned_abs());
        start.cycle_forward().take(count).map(ByWeekday::Any)
    }
}

impl<T: IntoByWeekdayIter, const N: usize> IntoByWeekdayIter for [T; N] {
    fn into_by_weekday_iter(self) -> impl Iterator<Item = ByWeekday> {
        self.into_iter().flat_map(|wd| wd.into_by_weekday_iter())
    }
}

impl<T: IntoByWeekdayIter> IntoByWeekdayIter for Vec<T> {
    fn into_by_weekday_iter(self) -> impl Iterator<Item = ByWeekday> {
        self.into_iter().flat_map(|wd| wd.into_by_weekday_iter())
    }
}

/// How often a rule repeats.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Frequency {
    Yearly,
    Monthly,
    Weekly,
    Daily,
    Hourly,
    Minutely,
    Secondly,
}

impl Frequency {
    /// Every frequency, from the longest period to the shortest.
    pub const ALL: [Frequency; 7] = [
        Frequency::Yearly,
        Frequency::Monthly,
        Frequency::Weekly,
        Frequency::Daily,
        Frequency::Hourly,
        Frequency::Minutely,
        Frequency::Secondly,
    ];

    /// Returns the token for this frequency, e.g., `WEEKLY`.
    pub fn as_str(&self) -> &'static str {
        match *self {
            Frequency::Yearly => "YEARLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Daily => "DAILY",
            Frequency::Hourly => "HOURLY",
            Frequency::Minutely => "MINUTELY",
            Frequency::Secondly => "SECONDLY",
        }
    }

    fn to_span(&self, interval: i32) -> Option<Span> {
        let unit = match *self {
            Frequency::Yearly => 1.year(),
            Frequency::Monthly => 1.month(),
            Frequency::Weekly => 1.week(),
            Frequency::Daily => 1.day(),
            Frequency::Hourly => 1.hour(),
            Frequency::Minutely => 1.minute(),
            Frequency::Secondly => 1.second(),
        };
        unit.checked_mul(i64::from(interval)).ok()
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Frequency {
    type Err = FormatReason;

    fn from_str(s: &str) -> Result<Frequency, FormatReason> {
        Frequency::ALL
            .into_iter()
            .find(|freq| freq.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FormatReason::UnknownFrequency(s.to_string()))
    }
}

/// A BYDAY value: either any day with the given weekday, or the nth such
/// day of the month or year (negative counts from the end).
///
/// The `Ord` impl exists for sorting and de-duplicating filters. It puts
/// plain weekdays first, Monday through Sunday, then numbered weekdays by
/// number. It says nothing about calendar order, which depends on `WKST`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ByWeekday {
    Any(Weekday),
    Numbered { nth: i8, weekday: Weekday },
}

impl ByWeekday {
    /// Returns the matching dates between `first` and `last` (inclusive),
    /// which should span one year.
    ///
    /// A numbered weekday yields at most one date, counted from `first`
    /// when positive and from `last` when negative.
    fn within(
        &self,
        first: DateTime,
        last: DateTime,
    ) -> impl Iterator<Item = DateTime> + use<> {
        match *self {
            ByWeekday::Any(weekday) => {
                Either::Left(weekdays_between(weekday, first, last))
            }
            ByWeekday::Numbered { nth, weekday } => {
                let from = if nth < 0 { last } else { first };
                // `nth_weekday` never counts its receiver, so when the
                // boundary itself matches it is the first one found.
                let found = if from.weekday() != weekday {
                    from.nth_weekday(i32::from(nth), weekday).ok()
                } else if nth.abs() == 1 {
                    Some(from)
                } else {
                    from.nth_weekday(i32::from(nth - nth.signum()), weekday)
                        .ok()
                };
                Either::Right(
                    found.filter(|dt| first <= *dt && *dt <= last).into_iter(),
                )
            }
        }
    }
}

impl Ord for ByWeekday {
    fn cmp(&self, rhs: &ByWeekday) -> Ordering {
        let key = |bywd: &ByWeekday| match *bywd {
            ByWeekday::Any(wd) => (false, 0, wd.to_monday_one_offset()),
            ByWeekday::Numbered { nth, weekday } => {
                (true, nth, weekday.to_monday_one_offset())
            }
        };
        key(self).cmp(&key(rhs))
    }
}

impl PartialOrd for ByWeekday {
    fn partial_cmp(&self, rhs: &ByWeekday) -> Option<Ordering> {
        Some(self.cmp(rhs))
    }
}

impl std::str::FromStr for ByWeekday {
    type Err = FormatReason;

    /// Parses tokens like `MO`, `3FR`, `+1SU` or `-1SA`.
    fn from_str(s: &str) -> Result<ByWeekday, FormatReason> {
        let invalid = || FormatReason::InvalidWeekday(s.to_string());
        let token = s.trim();
        let split = token.len().checked_sub(2).ok_or_else(invalid)?;
        if !token.is_char_boundary(split) {
            return Err(invalid());
        }
        let (nth, weekday) = token.split_at(split);
        let weekday = parse_weekday(weekday).ok_or_else(invalid)?;
        if nth.is_empty() {
            return Ok(ByWeekday::Any(weekday));
        }
        let nth = nth.parse::<i8>().map_err(|_| invalid())?;
        Ok(ByWeekday::Numbered { nth, weekday })
    }
}

impl std::fmt::Display for ByWeekday {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            ByWeekday::Any(weekday) => f.write_str(weekday_token(weekday)),
            ByWeekday::Numbered { nth, weekday } => {
                write!(f, "{nth}{}", weekday_token(weekday))
            }
        }
    }
}

/// Returns the two letter RFC 5545 abbreviation for a weekday.
pub(crate) fn weekday_token(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Monday => "MO",
        Weekday::Tuesday => "TU",
        Weekday::Wednesday => "WE",
        Weekday::Thursday => "TH",
        Weekday::Friday => "FR",
        Weekday::Saturday => "SA",
        Weekday::Sunday => "SU",
    }
}

/// Parses a two letter weekday abbreviation, ignoring case.
pub(crate) fn parse_weekday(token: &str) -> Option<Weekday> {
    Weekday::Monday
        .cycle_forward()
        .take(7)
        .find(|&wd| weekday_token(wd).eq_ignore_ascii_case(token))
}

/// A simple `Either` type for easy construction of `impl Iterator`.
enum Either<L, R> {
    Left(L),
    Right(R),
}

impl<L, R, I> Iterator for Either<L, R>
where
    L: Iterator<Item = I>,
    R: Iterator<Item = I>,
{
    type Item = I;

    fn next(&mut self) -> Option<I> {
        match *self {
            Either::Left(ref mut it) => it.next(),
            Either::Right(ref mut it) => it.next(),
        }
    }
}

/// Every date with the given weekday between `first` and `last`
/// (inclusive).
fn weekdays_between(
    weekday: Weekday,
    first: DateTime,
    last: DateTime,
) -> impl Iterator<Item = DateTime> + use<> {
    let start = if first.weekday() == weekday {
        Some(first)
    } else {
        first.nth_weekday(1, weekday).ok()
    };
    std::iter::successors(start, |dt| dt.checked_add(1.week()).ok())
        .take_while(move |dt| *dt <= last)
}
