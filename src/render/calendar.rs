//! Calendar invitation previews.
//!
//! Reads the first VEVENT of an iCalendar payload and renders the parts a
//! reader needs at a glance: what, where, when, who, and whether the viewer
//! has already answered.

use chrono::{NaiveDate, NaiveDateTime};
use tracing::warn;

use crate::config::Identity;
use crate::error::CalendarError;
use crate::model::address::EmailAddress;
use crate::model::calendar::CalendarPreview;
use crate::parser::ical::{self, Component, Property};

const DATE_FORMAT: &str = "%a, %d %b %Y";
const DATE_TIME_FORMAT: &str = "%a, %d %b %Y %H:%M";

/// Build a preview, or `None` when the payload cannot be read.
///
/// `forwarded_to` counts as one of the viewer's identities when resolving
/// the viewer's own participation status.
pub fn preview(
    ics: &str,
    identities: &[Identity],
    forwarded_to: Option<&str>,
) -> Option<CalendarPreview> {
    match build(ics, identities, forwarded_to) {
        Ok(preview) => Some(preview),
        Err(e) => {
            warn!(error = %e, "Calendar preview unavailable");
            None
        }
    }
}

fn build(
    ics: &str,
    identities: &[Identity],
    forwarded_to: Option<&str>,
) -> Result<CalendarPreview, CalendarError> {
    let calendar = ical::parse(&ical::repair(ics))?;
    let event = calendar
        .component("VEVENT")
        .ok_or(CalendarError::NoEvent)?;

    let dtstart = event
        .property("DTSTART")
        .ok_or(CalendarError::MissingProperty("DTSTART"))?;
    let start = EventTime::parse(dtstart)?;
    let end = event.property("DTEND").map(EventTime::parse).transpose()?;

    let is_viewer = |address: &EmailAddress| {
        identities.iter().any(|id| address.is(&id.email))
            || forwarded_to.is_some_and(|f| address.is(f))
    };

    let mut status = None;
    let mut attendees = Vec::new();
    for attendee in event.properties_named("ATTENDEE") {
        let address = EmailAddress::parse(&attendee.value);
        let name = attendee
            .param("CN")
            .filter(|cn| !cn.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| address.address.clone());
        if is_viewer(&address) {
            if status.is_none() {
                status = Some(
                    attendee
                        .param("PARTSTAT")
                        .unwrap_or("NEEDS-ACTION")
                        .to_ascii_uppercase(),
                );
            }
            attendees.push(format!("{name} (you)"));
        } else {
            attendees.push(name);
        }
    }

    let (recurrence_description, raw_rrule) = match event.property("RRULE") {
        Some(rule) => (
            Some(describe_rrule(&rule.value)?),
            Some(rule.value.clone()),
        ),
        None => (None, None),
    };

    Ok(CalendarPreview {
        method: calendar.property("METHOD").map(|m| m.value.trim().to_string()),
        status,
        summary: text_of(event, "SUMMARY"),
        location: text_of(event, "LOCATION"),
        organizer: event.property("ORGANIZER").and_then(organizer_name),
        start: start.display(),
        end: end.as_ref().map(EventTime::display),
        dtstart: dtstart.value.trim().to_string(),
        dtend: event.property("DTEND").map(|p| p.value.trim().to_string()),
        timezone: start.timezone(),
        attendees: attendees.join(", "),
        recurrence_description,
        raw_rrule,
    })
}

fn text_of(event: &Component, name: &str) -> String {
    event
        .property(name)
        .map(|p| p.text().trim().to_string())
        .unwrap_or_default()
}

fn organizer_name(prop: &Property) -> Option<String> {
    if let Some(cn) = prop.param("CN").filter(|cn| !cn.trim().is_empty()) {
        return Some(cn.trim().to_string());
    }
    let address = EmailAddress::parse(&prop.value);
    (!address.address.is_empty()).then_some(address.address)
}

/// A `DTSTART` / `DTEND` value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EventTime {
    /// All-day value (`VALUE=DATE`).
    Date(NaiveDate),
    Floating(NaiveDateTime),
    Utc(NaiveDateTime),
    Zoned(NaiveDateTime, String),
}

impl EventTime {
    fn parse(prop: &Property) -> Result<Self, CalendarError> {
        let value = prop.value.trim();
        let bad = || CalendarError::BadDateTime(value.to_string());

        let is_date = prop
            .param("VALUE")
            .is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
            || value.len() == 8;
        if is_date {
            return NaiveDate::parse_from_str(value, "%Y%m%d")
                .map(Self::Date)
                .map_err(|_| bad());
        }

        let (local, utc) = match value.strip_suffix(['Z', 'z']) {
            Some(local) => (local, true),
            None => (value, false),
        };
        let time = NaiveDateTime::parse_from_str(local, "%Y%m%dT%H%M%S").map_err(|_| bad())?;
        Ok(match prop.param("TZID") {
            _ if utc => Self::Utc(time),
            Some(tzid) if !tzid.trim().is_empty() => Self::Zoned(time, tzid.trim().to_string()),
            _ => Self::Floating(time),
        })
    }

    fn display(&self) -> String {
        match self {
            Self::Date(date) => date.format(DATE_FORMAT).to_string(),
            Self::Floating(time) | Self::Utc(time) | Self::Zoned(time, _) => {
                time.format(DATE_TIME_FORMAT).to_string()
            }
        }
    }

    fn timezone(&self) -> Option<String> {
        match self {
            Self::Date(_) | Self::Floating(_) => None,
            Self::Utc(_) => Some("UTC".to_string()),
            Self::Zoned(_, tzid) => Some(tzid.clone()),
        }
    }
}

/// Describe an RRULE in English, e.g. `FREQ=WEEKLY;BYDAY=MO,WE;COUNT=4`
/// becomes "Every week on Monday and Wednesday, 4 times".
pub fn describe_rrule(rule: &str) -> Result<String, CalendarError> {
    let bad = || CalendarError::BadRecurrence(rule.to_string());

    let mut freq = None;
    let mut interval = 1u32;
    let mut by_day = Vec::new();
    let mut by_month_day = Vec::new();
    let mut by_month = Vec::new();
    let mut count = None;
    let mut until = None;

    for part in rule.trim().split(';').filter(|p| !p.is_empty()) {
        let (key, value) = part.split_once('=').ok_or_else(bad)?;
        let value = value.trim();
        match key.trim().to_ascii_uppercase().as_str() {
            "FREQ" => freq = Some(value.to_ascii_uppercase()),
            "INTERVAL" => interval = value.parse().map_err(|_| bad())?,
            "BYDAY" => {
                for day in value.split(',') {
                    by_day.push(describe_weekday(day).ok_or_else(bad)?);
                }
            }
            "BYMONTHDAY" => {
                for day in value.split(',') {
                    let n: i32 = day.trim().parse().map_err(|_| bad())?;
                    by_month_day.push(describe_month_day(n));
                }
            }
            "BYMONTH" => {
                for month in value.split(',') {
                    let n: usize = month.trim().parse().map_err(|_| bad())?;
                    by_month.push(*MONTHS.get(n.wrapping_sub(1)).ok_or_else(bad)?);
                }
            }
            "COUNT" => count = Some(value.parse::<u32>().map_err(|_| bad())?),
            "UNTIL" => until = Some(describe_until(value).ok_or_else(bad)?),
            // WKST, BYSETPOS, BYHOUR, ... do not change the summary
            _ => {}
        }
    }

    let unit = match freq.as_deref().ok_or_else(bad)? {
        "SECONDLY" => "second",
        "MINUTELY" => "minute",
        "HOURLY" => "hour",
        "DAILY" => "day",
        "WEEKLY" => "week",
        "MONTHLY" => "month",
        "YEARLY" => "year",
        _ => return Err(bad()),
    };

    let mut text = match interval {
        0 => return Err(bad()),
        1 => format!("Every {unit}"),
        n => format!("Every {n} {unit}s"),
    };
    if !by_day.is_empty() {
        text.push_str(" on ");
        text.push_str(&join_words(&by_day));
    }
    if !by_month_day.is_empty() {
        text.push_str(" on the ");
        text.push_str(&join_words(&by_month_day));
    }
    if !by_month.is_empty() {
        text.push_str(" in ");
        text.push_str(&join_words(&by_month));
    }
    match count {
        Some(1) => text.push_str(", once"),
        Some(n) => text.push_str(&format!(", {n} times")),
        None => {}
    }
    if let Some(until) = until {
        text.push_str(", until ");
        text.push_str(&until);
    }
    Ok(text)
}

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// `MO` -> "Monday", `2TU` -> "the second Tuesday", `-1FR` -> "the last Friday".
fn describe_weekday(token: &str) -> Option<String> {
    let token = token.trim().to_ascii_uppercase();
    if !token.is_ascii() {
        return None;
    }
    let split = token.len().checked_sub(2)?;
    let (ordinal, code) = token.split_at(split);
    let name = match code {
        "MO" => "Monday",
        "TU" => "Tuesday",
        "WE" => "Wednesday",
        "TH" => "Thursday",
        "FR" => "Friday",
        "SA" => "Saturday",
        "SU" => "Sunday",
        _ => return None,
    };
    if ordinal.is_empty() {
        return Some(name.to_string());
    }
    let n: i32 = ordinal.strip_prefix('+').unwrap_or(ordinal).parse().ok()?;
    Some(format!("the {} {name}", ordinal_word(n)))
}

fn ordinal_word(n: i32) -> String {
    match n {
        1 => "first".into(),
        2 => "second".into(),
        3 => "third".into(),
        4 => "fourth".into(),
        5 => "fifth".into(),
        -1 => "last".into(),
        -2 => "second to last".into(),
        n if n < 0 => format!("{} to last", numeric_ordinal(n.unsigned_abs())),
        n => numeric_ordinal(n.unsigned_abs()),
    }
}

fn describe_month_day(n: i32) -> String {
    match n {
        -1 => "last day".into(),
        n if n < 0 => format!("{} to last day", numeric_ordinal(n.unsigned_abs())),
        n => numeric_ordinal(n.unsigned_abs()),
    }
}

fn numeric_ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

fn describe_until(value: &str) -> Option<String> {
    let value = value.trim_end_matches(['Z', 'z']);
    if value.len() == 8 {
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()
            .map(|d| d.format(DATE_FORMAT).to_string());
    }
    NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .ok()
        .map(|t| t.format(DATE_FORMAT).to_string())
}

/// "a", "a and b", "a, b and c".
fn join_words<S: AsRef<str>>(words: &[S]) -> String {
    match words {
        [] => String::new(),
        [only] => only.as_ref().to_string(),
        [head @ .., last] => format!(
            "{} and {}",
            head.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(", "),
            last.as_ref()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BERLIN: &str = "BEGIN:VCALENDAR\r\n\
PRODID:-//Example//Calendar//EN\r\n\
VERSION:2.0\r\n\
METHOD:REQUEST\r\n\
BEGIN:VEVENT\r\n\
UID:1234@example.com\r\n\
SUMMARY:Sprint review\r\n\
LOCATION:Room 4\\, 2nd floor\r\n\
ORGANIZER;CN=Jane Doe:mailto:jane@example.com\r\n\
ATTENDEE;CN=Bob;PARTSTAT=ACCEPTED:mailto:bob@example.com\r\n\
ATTENDEE;PARTSTAT=TENTATIVE:mailto:me@example.org\r\n\
DTSTART;TZID=Europe/Berlin:20111101T090000\r\n\
DTEND;TZID=Europe/Berlin:20111101T100000\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    fn me() -> Vec<Identity> {
        vec![Identity {
            name: "Me".into(),
            email: "ME@example.org".into(),
        }]
    }

    #[test]
    fn test_zoned_event() {
        let p = preview(BERLIN, &me(), None).unwrap();
        assert_eq!(p.method.as_deref(), Some("REQUEST"));
        assert_eq!(p.summary, "Sprint review");
        assert_eq!(p.location, "Room 4, 2nd floor");
        assert_eq!(p.organizer.as_deref(), Some("Jane Doe"));
        assert_eq!(p.dtstart, "20111101T090000");
        assert_eq!(p.dtend.as_deref(), Some("20111101T100000"));
        assert_eq!(p.timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(p.start, "Tue, 01 Nov 2011 09:00");
        assert_eq!(p.end.as_deref(), Some("Tue, 01 Nov 2011 10:00"));
        assert_eq!(p.status.as_deref(), Some("TENTATIVE"));
        assert_eq!(p.attendees, "Bob, me@example.org (you)");
        assert!(p.recurrence_description.is_none());
        assert!(p.raw_rrule.is_none());
    }

    #[test]
    fn test_truncated_calendar_matches_repaired() {
        let truncated = BERLIN.split("END:VEVENT").next().unwrap();
        assert_eq!(preview(truncated, &me(), None), preview(BERLIN, &me(), None));
    }

    #[test]
    fn test_forwarded_to_counts_as_viewer() {
        let p = preview(BERLIN, &[], Some("bob@example.com")).unwrap();
        assert_eq!(p.status.as_deref(), Some("ACCEPTED"));
        assert_eq!(p.attendees, "Bob (you), me@example.org");
        let p = preview(BERLIN, &[], None).unwrap();
        assert!(p.status.is_none());
    }

    #[test]
    fn test_all_day_and_utc() {
        let ics = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nSUMMARY:Holiday\n\
DTSTART;VALUE=DATE:20240101\nDTEND;VALUE=DATE:20240102\nEND:VEVENT\nEND:VCALENDAR\n";
        let p = preview(ics, &[], None).unwrap();
        assert_eq!(p.start, "Mon, 01 Jan 2024");
        assert_eq!(p.end.as_deref(), Some("Tue, 02 Jan 2024"));
        assert!(p.timezone.is_none());

        let ics = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nDTSTART:20240101T083000Z\nEND:VEVENT\nEND:VCALENDAR\n";
        let p = preview(ics, &[], None).unwrap();
        assert_eq!(p.start, "Mon, 01 Jan 2024 08:30");
        assert_eq!(p.timezone.as_deref(), Some("UTC"));
        assert!(p.end.is_none());
        assert_eq!(p.attendees, "");
    }

    #[test]
    fn test_malformed_calendars_degrade_to_none() {
        assert!(preview("not a calendar", &[], None).is_none());
        assert!(preview("BEGIN:VCALENDAR\nEND:VCALENDAR\n", &[], None).is_none());
        let bad_date = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nDTSTART:tomorrow\nEND:VEVENT\nEND:VCALENDAR\n";
        assert!(preview(bad_date, &[], None).is_none());
    }

    #[test]
    fn test_recurrence() {
        let ics = BERLIN.replace(
            "END:VEVENT",
            "RRULE:FREQ=WEEKLY;BYDAY=MO,WE;COUNT=10\r\nEND:VEVENT",
        );
        let p = preview(&ics, &me(), None).unwrap();
        assert_eq!(p.raw_rrule.as_deref(), Some("FREQ=WEEKLY;BYDAY=MO,WE;COUNT=10"));
        assert_eq!(
            p.recurrence_description.as_deref(),
            Some("Every week on Monday and Wednesday, 10 times")
        );
    }

    #[test]
    fn test_describe_rrule() {
        assert_eq!(describe_rrule("FREQ=DAILY").unwrap(), "Every day");
        assert_eq!(
            describe_rrule("FREQ=MONTHLY;INTERVAL=2;BYDAY=-1FR;UNTIL=20121231T000000Z").unwrap(),
            "Every 2 months on the last Friday, until Mon, 31 Dec 2012"
        );
        assert_eq!(
            describe_rrule("FREQ=MONTHLY;BYMONTHDAY=1,15,-1").unwrap(),
            "Every month on the 1st, 15th and last day"
        );
        assert_eq!(
            describe_rrule("FREQ=YEARLY;BYMONTH=3;BYDAY=2SU;COUNT=1").unwrap(),
            "Every year on the second Sunday in March, once"
        );
        assert!(matches!(
            describe_rrule("INTERVAL=2"),
            Err(CalendarError::BadRecurrence(_))
        ));
        assert!(describe_rrule("FREQ=FORTNIGHTLY").is_err());
        assert!(describe_rrule("FREQ=WEEKLY;BYDAY=XX").is_err());
    }

    #[test]
    fn test_numeric_ordinal() {
        assert_eq!(numeric_ordinal(1), "1st");
        assert_eq!(numeric_ordinal(12), "12th");
        assert_eq!(numeric_ordinal(22), "22nd");
        assert_eq!(numeric_ordinal(113), "113th");
    }
}
