use crate::command::assert_cmd_snapshot;

fn check() -> crate::command::Command {
    crate::recur(["check"])
}

const MEETINGS: &str = "\
DTSTART:20240101T090000
DTEND:20240101T100000
RRULE:FREQ=WEEKLY;BYDAY=MO
RRULE:FREQ=MONTHLY;BYMONTHDAY=1
RDATE:20240105T090000,20240106T090000
EXDATE:20240108T090000
";

#[test]
fn accepts_by_default() {
    assert_cmd_snapshot!(
        check().stdin(MEETINGS),
        @r"
    success: true
    exit_code: 0
    ----- stdout -----
    DTSTART:20240101T090000
    DTEND:20240101T100000
    RRULE:FREQ=WEEKLY;BYDAY=MO
    RRULE:FREQ=MONTHLY;BYMONTHDAY=1
    RDATE:20240105T090000
    RDATE:20240106T090000
    EXDATE:20240108T090000

    ----- stderr -----
    ",
    );
}

#[test]
fn drops_anchors() {
    assert_cmd_snapshot!(
        check().args(["--no-dtstart", "--no-dtend"]).stdin(MEETINGS),
        @r"
    success: true
    exit_code: 0
    ----- stdout -----
    RRULE:FREQ=WEEKLY;BYDAY=MO
    RRULE:FREQ=MONTHLY;BYMONTHDAY=1
    RDATE:20240105T090000
    RDATE:20240106T090000
    EXDATE:20240108T090000

    ----- stderr -----
    ",
    );
}

#[test]
fn limits() {
    assert_cmd_snapshot!(
        check().args(["--max-rrules", "1"]).stdin(MEETINGS),
        @r"
    success: false
    exit_code: 1
    ----- stdout -----

    ----- stderr -----
    recurrence rejected by policy: max rules exceeded, the limit is 1
    ",
    );
    assert_cmd_snapshot!(
        check().args(["--max-rrules", "2", "--max-rdates", "2"]).stdin(MEETINGS),
        @r"
    success: true
    exit_code: 0
    ----- stdout -----
    DTSTART:20240101T090000
    DTEND:20240101T100000
    RRULE:FREQ=WEEKLY;BYDAY=MO
    RRULE:FREQ=MONTHLY;BYMONTHDAY=1
    RDATE:20240105T090000
    RDATE:20240106T090000
    EXDATE:20240108T090000

    ----- stderr -----
    ",
    );
    assert_cmd_snapshot!(
        check().args(["--max-exdates", "0"]).stdin(MEETINGS),
        @r"
    success: false
    exit_code: 1
    ----- stdout -----

    ----- stderr -----
    recurrence rejected by policy: max exclusion dates exceeded, the limit is 0
    ",
    );
}

#[test]
fn frequencies() {
    assert_cmd_snapshot!(
        check().args(["--frequencies", "weekly"]).stdin(MEETINGS),
        @r"
    success: false
    exit_code: 1
    ----- stdout -----

    ----- stderr -----
    recurrence rejected by policy: invalid frequency `MONTHLY`
    ",
    );
    assert_cmd_snapshot!(
        check().args(["--frequencies", "fortnightly"]).stdin(MEETINGS),
        @r"
    success: false
    exit_code: 1
    ----- stdout -----

    ----- stderr -----
    --frequencies: failed to parse `fortnightly` within sequence `fortnightly`: unrecognized frequency `fortnightly`
    ",
    );
}

#[test]
fn json_accepted() {
    assert_cmd_snapshot!(
        check().args(["--json", "--no-dtend"]).stdin(
            "DTSTART:20240101\nDTEND:20240102\nRRULE:FREQ=DAILY;COUNT=2\n"
        ),
        @r#"
    success: true
    exit_code: 0
    ----- stdout -----
    {"ok":true,"recurrence":"DTSTART:20240101\nRRULE:FREQ=DAILY;COUNT=2"}

    ----- stderr -----
    "#,
    );
}

#[test]
fn json_validation_error() {
    assert_cmd_snapshot!(
        check().args(["--json", "--max-rdates", "1"]).stdin(MEETINGS),
        @r#"
    success: false
    exit_code: 1
    ----- stdout -----
    {"ok":false,"error":{"kind":"validation","key":"max_rdates_exceeded","collection":"rdates","limit":1,"message":"max dates exceeded, the limit is 1"}}

    ----- stderr -----
    "#,
    );
    assert_cmd_snapshot!(
        check().args(["--json", "--frequencies", "daily,weekly"]).stdin(MEETINGS),
        @r#"
    success: false
    exit_code: 1
    ----- stdout -----
    {"ok":false,"error":{"kind":"validation","key":"invalid_frequency","frequency":"MONTHLY","message":"invalid frequency `MONTHLY`"}}

    ----- stderr -----
    "#,
    );
}

#[test]
fn json_format_error() {
    assert_cmd_snapshot!(
        check().arg("--json").stdin("DTSTART:20240101\nRRULE:FREQ=DAILY;COUNT=x\n"),
        @r#"
    success: false
    exit_code: 1
    ----- stdout -----
    {"ok":false,"error":{"kind":"format","key":"invalid_integer","line":2,"message":"line 2: failed to parse `x` as an integer for `COUNT`"}}

    ----- stderr -----
    "#,
    );
}

#[test]
fn short_help_lists_flags() {
    let snap = check().arg("-h").snapshot();
    let snap = snap.snapshot();
    assert!(snap.contains("success: true"), "{snap}");
    assert!(snap.contains("--max-exdates <number>"), "{snap}");
    assert!(snap.contains("<path>"), "{snap}");
    assert!(!snap.contains("%snip"), "{snap}");
    assert!(!snap.contains("localized message"), "{snap}");
}
