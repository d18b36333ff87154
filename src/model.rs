use std::collections::BTreeSet;

use crate::{rule::Rule, stamp::Stamp};

/// A complete recurrence description: an anchor, inclusion and exclusion
/// rules, and explicit inclusion and exclusion dates.
///
/// Every field is public. A recurrence is plain data with no interior
/// mutability, so callers (like [`Policy::check`](crate::Policy::check))
/// that want a changed recurrence make a copy and replace fields on it.
///
/// A recurrence is usually produced by parsing text:
///
/// ```
/// let rec: recur::Recurrence = "\
/// DTSTART:20240101T090000
/// RRULE:FREQ=DAILY;COUNT=3
/// ".parse()?;
/// assert_eq!(rec.rrules.len(), 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Recurrence {
    /// The anchor that every rule is expanded from.
    pub dtstart: Option<Stamp>,
    /// Carried along for round trips. It never affects occurrences.
    pub dtend: Option<Stamp>,
    /// Inclusion rules, in the order they were written.
    pub rrules: Vec<Rule>,
    /// Exclusion rules, in the order they were written.
    pub exrules: Vec<Rule>,
    pub rdates: BTreeSet<Stamp>,
    pub exdates: BTreeSet<Stamp>,
}

impl Recurrence {
    /// Returns true when this recurrence has nothing that could produce or
    /// remove an occurrence.
    pub fn is_empty(&self) -> bool {
        self.rrules.is_empty()
            && self.exrules.is_empty()
            && self.rdates.is_empty()
            && self.exdates.is_empty()
    }

    /// Returns true when iterating requires `dtstart`.
    pub(crate) fn needs_anchor(&self) -> bool {
        !self.rrules.is_empty() || !self.exrules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_empty() {
        let rec = Recurrence::default();
        assert!(rec.is_empty());
        assert!(!rec.needs_anchor());
        assert_eq!(rec.dtstart, None);
    }

    #[test]
    fn dates_are_sets() {
        let mut rec = Recurrence::default();
        let stamp: Stamp = "20240101".parse().unwrap();
        assert!(rec.rdates.insert(stamp));
        assert!(!rec.rdates.insert(stamp));
        assert!(!rec.is_empty());
        assert!(!rec.needs_anchor());
    }

    #[test]
    fn send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Recurrence>();
    }
}
