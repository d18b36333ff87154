/*!
Lazy generation of the occurrences of a recurrence.

The occurrences of a recurrence are its inclusion set (RRULE expansions,
RDATEs and DTSTART) minus its exclusion set (EXRULE expansions and EXDATEs),
in ascending order without duplicates. Every source is itself an ascending
stream, so [`Occurrences`] is a k-way merge that pulls one datetime at a
time. Nothing is materialized up front, which is what makes unbounded rules
usable.
*/

use std::{collections::btree_set, iter::Peekable};

use jiff::civil::DateTime;

use crate::{
    error::{InvalidWindow, MissingAnchor},
    model::Recurrence,
    rule::{Rule, RuleIter},
    stamp::Stamp,
};

/// A half open range of datetimes, `[start, end)`, bounding evaluation.
///
/// A window never changes what the occurrences are, only which of them are
/// produced. Rules still count from `DTSTART`, so `COUNT=3` means the same
/// three occurrences with or without a window.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Window {
    start: DateTime,
    end: DateTime,
}

impl Window {
    /// Create a new window. This fails when `start > end`.
    pub fn new(start: DateTime, end: DateTime) -> Result<Window, InvalidWindow> {
        if start > end {
            return Err(InvalidWindow { start, end });
        }
        Ok(Window { start, end })
    }

    /// Create a window that begins at `start` and never ends.
    pub fn after(start: DateTime) -> Window {
        Window { start, end: DateTime::MAX }
    }

    /// Create a window that ends (exclusively) at `end`.
    pub fn before(end: DateTime) -> Window {
        Window { start: DateTime::MIN, end }
    }

    pub fn start(&self) -> DateTime {
        self.start
    }

    pub fn end(&self) -> DateTime {
        self.end
    }

    pub fn contains(&self, dt: DateTime) -> bool {
        self.start <= dt && dt < self.end
    }
}

impl Recurrence {
    /// Returns a lazy iterator over every occurrence of this recurrence.
    ///
    /// This fails when there is an RRULE or EXRULE but no `DTSTART` to
    /// anchor it. A recurrence made only of explicit dates needs no anchor.
    ///
    /// Each call returns an independent iterator that starts from the
    /// beginning.
    pub fn occurrences(&self) -> Result<Occurrences<'_>, MissingAnchor> {
        Occurrences::new(self, None)
    }

    /// Like [`Recurrence::occurrences`], but only produces occurrences
    /// inside `window`.
    ///
    /// Every rule stops expanding once it reaches the end of the window, so
    /// this terminates even for recurrences that would otherwise be
    /// infinite.
    pub fn occurrences_in(
        &self,
        window: Window,
    ) -> Result<Occurrences<'_>, MissingAnchor> {
        Occurrences::new(self, Some(window))
    }
}

/// Returns the occurrences of `rec`, optionally bounded by `window`.
pub fn iterate(
    rec: &Recurrence,
    window: Option<Window>,
) -> Result<Occurrences<'_>, MissingAnchor> {
    Occurrences::new(rec, window)
}

type Dates<'r> =
    Peekable<std::iter::Map<btree_set::Iter<'r, Stamp>, fn(&Stamp) -> DateTime>>;

/// A lazy, ascending, duplicate free iterator of occurrences.
///
/// This is created by [`Recurrence::occurrences`],
/// [`Recurrence::occurrences_in`] or [`iterate`]. Cloning it yields an
/// iterator that continues independently from the same position.
#[derive(Clone, Debug)]
pub struct Occurrences<'r> {
    window: Option<Window>,
    /// `DTSTART`, while it hasn't been produced yet.
    dtstart: Option<DateTime>,
    rrules: Vec<Peekable<RuleIter<'r>>>,
    rdates: Dates<'r>,
    exrules: Vec<Exclusion<'r>>,
    exdates: Dates<'r>,
    last: Option<DateTime>,
    done: bool,
}

impl<'r> Occurrences<'r> {
    fn new(
        rec: &'r Recurrence,
        window: Option<Window>,
    ) -> Result<Occurrences<'r>, MissingAnchor> {
        let anchor = match rec.dtstart {
            Some(stamp) => stamp.datetime(),
            None if rec.needs_anchor() => return Err(MissingAnchor),
            // Never read when there are no rules.
            None => DateTime::MIN,
        };
        let expand = |rule: &'r Rule| -> RuleIter<'r> {
            let it = rule.iter(anchor);
            match window {
                Some(w) => it.before(w.end()),
                None => it,
            }
        };
        log::debug!(
            "iterating {} rrules and {} exrules from {anchor} in {window:?}",
            rec.rrules.len(),
            rec.exrules.len(),
        );
        let dates = |set: &'r std::collections::BTreeSet<Stamp>| -> Dates<'r> {
            set.iter().map(Stamp::datetime as fn(&Stamp) -> DateTime).peekable()
        };
        Ok(Occurrences {
            window,
            dtstart: if rec.rrules.is_empty() { None } else { Some(anchor) },
            rrules: rec.rrules.iter().map(|r| expand(r).peekable()).collect(),
            rdates: dates(&rec.rdates),
            exrules: rec
                .exrules
                .iter()
                .map(|r| Exclusion { iter: expand(r), head: None })
                .collect(),
            exdates: dates(&rec.exdates),
            last: None,
            done: false,
        })
    }

    /// Whether `DTSTART` is an occurrence in its own right.
    ///
    /// This is on by default: when there is at least one RRULE, `DTSTART`
    /// is included even if no rule would produce it. This never affects a
    /// rule's `COUNT`. Call this before iterating.
    pub fn include_dtstart(mut self, yes: bool) -> Occurrences<'r> {
        if !yes {
            self.dtstart = None;
        }
        self
    }

    /// Removes and returns the smallest head among the inclusion sources,
    /// along with every other head equal to it.
    fn next_included(&mut self) -> Option<DateTime> {
        let mut min = self.dtstart;
        let mut consider = |dt: Option<&DateTime>| {
            if let Some(&dt) = dt {
                if min.is_none_or(|min| dt < min) {
                    min = Some(dt);
                }
            }
        };
        consider(self.rdates.peek());
        for rule in self.rrules.iter_mut() {
            consider(rule.peek());
        }
        let min = min?;
        if self.dtstart == Some(min) {
            self.dtstart = None;
        }
        self.rdates.next_if_eq(&min);
        for rule in self.rrules.iter_mut() {
            rule.next_if_eq(&min);
        }
        Some(min)
    }

    fn is_excluded(&mut self, dt: DateTime) -> bool {
        while self.exdates.next_if(|&exdate| exdate < dt).is_some() {}
        if self.exdates.peek() == Some(&dt) {
            return true;
        }
        self.exrules.iter_mut().any(|exrule| exrule.matches(dt))
    }
}

impl<'r> Iterator for Occurrences<'r> {
    type Item = DateTime;

    fn next(&mut self) -> Option<DateTime> {
        while !self.done {
            let Some(dt) = self.next_included() else {
                self.done = true;
                break;
            };
            if self.last.is_some_and(|last| dt <= last) {
                continue;
            }
            self.last = Some(dt);
            if let Some(window) = self.window {
                if dt >= window.end() {
                    self.done = true;
                    break;
                }
                if dt < window.start() {
                    continue;
                }
            }
            if self.is_excluded(dt) {
                continue;
            }
            return Some(dt);
        }
        None
    }
}

impl<'r> std::iter::FusedIterator for Occurrences<'r> {}

/// An exclusion rule, advanced only as far as the inclusion candidates.
///
/// An exclusion rule can go arbitrarily long without producing anything, so
/// it must never be asked for "its next datetime" unconditionally.
#[derive(Clone, Debug)]
struct Exclusion<'r> {
    iter: RuleIter<'r>,
    head: Option<DateTime>,
}

impl<'r> Exclusion<'r> {
    /// Reports whether this rule produces `dt`.
    ///
    /// Candidates must be given in ascending order.
    fn matches(&mut self, dt: DateTime) -> bool {
        loop {
            match self.head {
                Some(head) if head < dt => self.head = None,
                Some(head) => return head == dt,
                None => {
                    self.head = self.iter.next_through(dt);
                    if self.head.is_none() {
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::parse;

    use super::*;

    #[test]
    fn daily_count() {
        let rec = parse(
            "DTSTART:20240101T090000\n\
             RRULE:FREQ=DAILY;COUNT=3",
        )
        .unwrap();
        insta::assert_snapshot!(snapshot(rec.occurrences().unwrap()), @r"
        2024-01-01T09:00:00
        2024-01-02T09:00:00
        2024-01-03T09:00:00
        ");
    }

    #[test]
    fn exdate_removes_exact_match() {
        let rec = parse(
            "DTSTART:20240101T090000\n\
             RRULE:FREQ=DAILY;COUNT=5\n\
             EXDATE:20240103T090000",
        )
        .unwrap();
        insta::assert_snapshot!(snapshot(rec.occurrences().unwrap()), @r"
        2024-01-01T09:00:00
        2024-01-02T09:00:00
        2024-01-04T09:00:00
        2024-01-05T09:00:00
        ");
    }

    #[test]
    fn exdate_needs_exact_time() {
        let rec = parse(
            "DTSTART:20240101T090000\n\
             RRULE:FREQ=DAILY;COUNT=3\n\
             EXDATE:20240102,20240103T090001",
        )
        .unwrap();
        assert_eq!(rec.occurrences().unwrap().count(), 3);
    }

    #[test]
    fn merges_rules_and_dates() {
        let rec = parse(
            "DTSTART:20240101T090000\n\
             RRULE:FREQ=WEEKLY;COUNT=3\n\
             RRULE:FREQ=DAILY;INTERVAL=7;COUNT=2\n\
             RDATE:20240103T120000,20240108T090000,20231231",
        )
        .unwrap();
        insta::assert_snapshot!(snapshot(rec.occurrences().unwrap()), @r"
        2023-12-31T00:00:00
        2024-01-01T09:00:00
        2024-01-03T12:00:00
        2024-01-08T09:00:00
        2024-01-15T09:00:00
        ");
    }

    #[test]
    fn dtstart_is_included() {
        // The first Friday after the anchor is Jan 5, but the anchor itself
        // is an occurrence too.
        let rec = parse(
            "DTSTART:20240101T090000\n\
             RRULE:FREQ=WEEKLY;BYDAY=FR;COUNT=2",
        )
        .unwrap();
        insta::assert_snapshot!(snapshot(rec.occurrences().unwrap()), @r"
        2024-01-01T09:00:00
        2024-01-05T09:00:00
        2024-01-12T09:00:00
        ");
        insta::assert_snapshot!(
            snapshot(rec.occurrences().unwrap().include_dtstart(false)),
            @r"
        2024-01-05T09:00:00
        2024-01-12T09:00:00
        ",
        );
    }

    #[test]
    fn exrule_removes_occurrences() {
        let rec = parse(
            "DTSTART:20240101T090000\n\
             RRULE:FREQ=DAILY;COUNT=10\n\
             EXRULE:FREQ=DAILY;INTERVAL=2",
        )
        .unwrap();
        insta::assert_snapshot!(snapshot(rec.occurrences().unwrap()), @r"
        2024-01-02T09:00:00
        2024-01-04T09:00:00
        2024-01-06T09:00:00
        2024-01-08T09:00:00
        2024-01-10T09:00:00
        ");
    }

    /// An exclusion rule that never produces anything must not stall an
    /// unbounded inclusion rule.
    #[test]
    fn silent_exrule_does_not_stall() {
        let rec = parse(
            "DTSTART:20240101T090000\n\
             RRULE:FREQ=DAILY\n\
             EXRULE:FREQ=YEARLY;BYMONTH=2;BYMONTHDAY=30",
        )
        .unwrap();
        let got: Vec<DateTime> = rec.occurrences().unwrap().take(3).collect();
        assert_eq!(got.len(), 3);
        assert_eq!(got[2], dt("20240103T090000"));
    }

    #[test]
    fn unbounded_is_lazy_and_restartable() {
        let rec = parse(
            "DTSTART:20240101T090000\n\
             RRULE:FREQ=SECONDLY",
        )
        .unwrap();
        let first: Vec<DateTime> = rec.occurrences().unwrap().take(5).collect();
        let again: Vec<DateTime> = rec.occurrences().unwrap().take(5).collect();
        assert_eq!(first, again);
        assert_eq!(first[4], dt("20240101T090004"));

        let mut it = rec.occurrences().unwrap();
        it.next();
        let mut copy = it.clone();
        assert_eq!(it.next(), copy.next());
    }

    #[test]
    fn window_bounds_unbounded_rules() {
        let rec = parse(
            "DTSTART:20240101T090000\n\
             RRULE:FREQ=DAILY\n\
             EXDATE:20240111T090000",
        )
        .unwrap();
        let window =
            Window::new(dt("20240110T000000"), dt("20240113T090000")).unwrap();
        insta::assert_snapshot!(
            snapshot(rec.occurrences_in(window).unwrap()),
            @r"
        2024-01-10T09:00:00
        2024-01-12T09:00:00
        ",
        );
    }

    #[test]
    fn window_terminates_never_matching_rule() {
        let rec = parse(
            "DTSTART:20240101T090000\n\
             RRULE:FREQ=DAILY;BYMONTH=2;BYMONTHDAY=30",
        )
        .unwrap();
        let window = Window::before(dt("20300101T000000"));
        let got: Vec<DateTime> =
            iterate(&rec, Some(window)).unwrap().include_dtstart(false).collect();
        assert!(got.is_empty());
    }

    #[test]
    fn window_does_not_change_count() {
        let rec = parse(
            "DTSTART:20240101T090000\n\
             RRULE:FREQ=DAILY;COUNT=3",
        )
        .unwrap();
        let window = Window::after(dt("20240102T000000"));
        insta::assert_snapshot!(
            snapshot(rec.occurrences_in(window).unwrap()),
            @r"
        2024-01-02T09:00:00
        2024-01-03T09:00:00
        ",
        );
    }

    #[test]
    fn strictly_increasing() {
        let rec = parse(
            "DTSTART:20240101T090000\n\
             RRULE:FREQ=DAILY;COUNT=20\n\
             RRULE:FREQ=WEEKLY;BYDAY=MO,WE,FR;COUNT=8\n\
             RRULE:FREQ=MONTHLY;BYMONTHDAY=1,5,-1;COUNT=4\n\
             RDATE:20240101T090000,20240110T090000,20240110T100000\n\
             EXRULE:FREQ=WEEKLY;BYDAY=WE;COUNT=2\n\
             EXDATE:20240105T090000",
        )
        .unwrap();
        let all: Vec<DateTime> = rec.occurrences().unwrap().collect();
        assert!(all.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(all.len(), 20);
        // Excluded by the EXRULE, which ends after its second Wednesday.
        assert!(!all.contains(&dt("20240103T090000")));
        assert!(!all.contains(&dt("20240110T090000")));
        assert!(all.contains(&dt("20240117T090000")));
        assert!(!all.contains(&dt("20240105T090000")));
        assert!(all.contains(&dt("20240110T100000")));
        assert!(all.contains(&dt("20240131T090000")));
    }

    #[test]
    fn dates_only_need_no_anchor() {
        let rec = parse("RDATE:20240102,20240101\nEXDATE:20240102").unwrap();
        insta::assert_snapshot!(
            snapshot(rec.occurrences().unwrap()),
            @"2024-01-01T00:00:00",
        );
    }

    #[test]
    fn rules_need_an_anchor() {
        let rec = parse("RRULE:FREQ=DAILY").unwrap();
        assert_eq!(rec.occurrences().unwrap_err(), MissingAnchor);
        let rec = parse("EXRULE:FREQ=DAILY\nRDATE:20240101").unwrap();
        assert_eq!(iterate(&rec, None).unwrap_err(), MissingAnchor);
    }

    #[test]
    fn empty_recurrence() {
        let rec = Recurrence::default();
        assert_eq!(rec.occurrences().unwrap().next(), None);
    }

    #[test]
    fn invalid_window() {
        let err =
            Window::new(dt("20240102T000000"), dt("20240101T000000")).unwrap_err();
        insta::assert_snapshot!(
            err,
            @"window start `2024-01-02T00:00:00` is after its end `2024-01-01T00:00:00`",
        );
        let w = Window::new(dt("20240101T000000"), dt("20240101T000000")).unwrap();
        assert!(!w.contains(dt("20240101T000000")));
    }

    fn dt(s: &str) -> DateTime {
        s.parse::<Stamp>().unwrap().datetime()
    }

    fn snapshot(it: impl Iterator<Item = DateTime>) -> String {
        it.map(|dt| dt.to_string()).collect::<Vec<String>>().join("\n")
    }
}
