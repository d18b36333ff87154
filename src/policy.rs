/*!
Acceptance policies for recurrences.

A [`Policy`] describes what a caller is willing to accept: which frequencies
rules may use, whether anchors are kept and how many items each collection
may hold. [`Policy::check`] applies it to a recurrence.
*/

use crate::{
    error::{Collection, ValidationError},
    model::Recurrence,
    rule::{Frequency, Rule},
};

/// An immutable acceptance policy for recurrences.
///
/// The default policy accepts everything: every frequency, both anchors and
/// any number of rules and dates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Policy {
    frequencies: Vec<Frequency>,
    accept_dtstart: bool,
    accept_dtend: bool,
    max_rrules: Option<usize>,
    max_exrules: Option<usize>,
    max_rdates: Option<usize>,
    max_exdates: Option<usize>,
}

impl Default for Policy {
    fn default() -> Policy {
        Policy {
            frequencies: Frequency::ALL.to_vec(),
            accept_dtstart: true,
            accept_dtend: true,
            max_rrules: None,
            max_exrules: None,
            max_rdates: None,
            max_exdates: None,
        }
    }
}

impl Policy {
    /// Returns a builder starting from the default policy.
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder { policy: Policy::default() }
    }

    /// Checks a recurrence against this policy.
    ///
    /// On success, this returns a copy of `rec` in which `DTSTART` and
    /// `DTEND` are cleared if this policy doesn't accept them. The input is
    /// never modified, so a failed check leaves nothing half applied.
    ///
    /// Limits are checked first, in the order RRULE, EXRULE, RDATE and
    /// EXDATE. Then the frequency of every RRULE, followed by every EXRULE.
    /// The first violation found is returned.
    pub fn check(
        &self,
        rec: &Recurrence,
    ) -> Result<Recurrence, ValidationError> {
        let limits = [
            (Collection::Rrules, self.max_rrules, rec.rrules.len()),
            (Collection::Exrules, self.max_exrules, rec.exrules.len()),
            (Collection::Rdates, self.max_rdates, rec.rdates.len()),
            (Collection::Exdates, self.max_exdates, rec.exdates.len()),
        ];
        for (collection, limit, len) in limits {
            let Some(limit) = limit else { continue };
            if len > limit {
                log::debug!(
                    "rejecting recurrence with {len} {collection}, \
                     limit is {limit}",
                    collection = collection.as_str(),
                );
                return Err(ValidationError::LimitExceeded { collection, limit });
            }
        }
        for rule in rec.rrules.iter().chain(rec.exrules.iter()) {
            self.check_frequency(rule)?;
        }

        let mut accepted = rec.clone();
        if !self.accept_dtstart && accepted.dtstart.take().is_some() {
            log::debug!("dropping DTSTART not accepted by policy");
        }
        if !self.accept_dtend && accepted.dtend.take().is_some() {
            log::debug!("dropping DTEND not accepted by policy");
        }
        Ok(accepted)
    }

    fn check_frequency(&self, rule: &Rule) -> Result<(), ValidationError> {
        let frequency = rule.frequency();
        if !self.frequencies.contains(&frequency) {
            log::debug!("rejecting rule with disallowed frequency {frequency}");
            return Err(ValidationError::DisallowedFrequency { frequency });
        }
        Ok(())
    }

    /// The frequencies rules may use, longest period first.
    pub fn frequencies(&self) -> &[Frequency] {
        &self.frequencies
    }

    pub fn accept_dtstart(&self) -> bool {
        self.accept_dtstart
    }

    pub fn accept_dtend(&self) -> bool {
        self.accept_dtend
    }

    pub fn max_rrules(&self) -> Option<usize> {
        self.max_rrules
    }

    pub fn max_exrules(&self) -> Option<usize> {
        self.max_exrules
    }

    pub fn max_rdates(&self) -> Option<usize> {
        self.max_rdates
    }

    pub fn max_exdates(&self) -> Option<usize> {
        self.max_exdates
    }
}

/// Checks `rec` against `policy`.
///
/// This is a convenience for [`Policy::check`].
pub fn check(
    rec: &Recurrence,
    policy: &Policy,
) -> Result<Recurrence, ValidationError> {
    policy.check(rec)
}

/// A builder for a [`Policy`].
///
/// A limit of `Some(0)` disables a collection entirely, while `None` leaves
/// it unlimited.
#[derive(Clone, Debug)]
pub struct PolicyBuilder {
    policy: Policy,
}

impl PolicyBuilder {
    pub fn build(&self) -> Policy {
        self.policy.clone()
    }

    /// Sets the frequencies that rules may use.
    ///
    /// Duplicates are ignored. An empty set rejects every rule.
    pub fn frequencies<I>(&mut self, frequencies: I) -> &mut PolicyBuilder
    where
        I: IntoIterator<Item = Frequency>,
    {
        let mut frequencies: Vec<Frequency> = frequencies.into_iter().collect();
        frequencies.sort();
        frequencies.dedup();
        self.policy.frequencies = frequencies;
        self
    }

    pub fn accept_dtstart(&mut self, yes: bool) -> &mut PolicyBuilder {
        self.policy.accept_dtstart = yes;
        self
    }

    pub fn accept_dtend(&mut self, yes: bool) -> &mut PolicyBuilder {
        self.policy.accept_dtend = yes;
        self
    }

    pub fn max_rrules(&mut self, limit: Option<usize>) -> &mut PolicyBuilder {
        self.policy.max_rrules = limit;
        self
    }

    pub fn max_exrules(&mut self, limit: Option<usize>) -> &mut PolicyBuilder {
        self.policy.max_exrules = limit;
        self
    }

    pub fn max_rdates(&mut self, limit: Option<usize>) -> &mut PolicyBuilder {
        self.policy.max_rdates = limit;
        self
    }

    pub fn max_exdates(&mut self, limit: Option<usize>) -> &mut PolicyBuilder {
        self.policy.max_exdates = limit;
        self
    }
}
