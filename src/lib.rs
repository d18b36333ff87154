/*!
Parse, serialize, validate and expand calendar recurrences.

A recurrence is the RFC 5545 description of a repeating event: an anchor
(`DTSTART`), rules that produce datetimes (`RRULE`), rules that remove them
(`EXRULE`) and explicit dates to add or remove (`RDATE` and `EXDATE`).

```
use recur::{Policy, Frequency};

let rec = recur::parse("\
DTSTART:20240101T090000
RRULE:FREQ=DAILY;COUNT=5
EXDATE:20240103T090000
")?;

let policy = Policy::builder().frequencies([Frequency::Daily]).build();
let rec = recur::check(&rec, &policy)?;

let days: Vec<String> = rec
    .occurrences()?
    .map(|dt| dt.strftime("%b %-d").to_string())
    .collect();
assert_eq!(days, ["Jan 1", "Jan 2", "Jan 4", "Jan 5"]);
# Ok::<(), Box<dyn std::error::Error>>(())
```

All datetimes are civil (`jiff::civil::DateTime`). There is no time zone
handling: a `Z` suffix on a timestamp is preserved on round trips but never
used for conversion.
*/

#![deny(missing_debug_implementations)]

pub use crate::{
    codec::{parse, serialize},
    error::{
        ByPart, Collection, ConstructionError, FormatError, FormatReason,
        InvalidWindow, MissingAnchor, ValidationError,
    },
    model::Recurrence,
    occurrence::{Occurrences, Window, iterate},
    policy::{Policy, PolicyBuilder, check},
    rule::{
        ByWeekday, Frequency, IntoByWeekdayIter, IntoI8Iter, IntoI16Iter,
        IntoI32Iter, Rule, RuleBuilder, RuleIter,
    },
    stamp::{Stamp, StampKind},
};

mod codec;
mod error;
mod model;
mod occurrence;
mod policy;
mod rule;
mod stamp;
mod weekdate;
