//! Calendar invitation preview.

use serde::Serialize;

/// Human-readable summary of the first VEVENT of an iCalendar attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CalendarPreview {
    /// VCALENDAR `METHOD` (`REQUEST`, `CANCEL`, `REPLY`, ...).
    pub method: Option<String>,
    /// The viewer's own `PARTSTAT`, when the viewer is an attendee.
    pub status: Option<String>,
    pub summary: String,
    pub location: String,
    /// Organizer display name.
    pub organizer: Option<String>,
    /// Display form of the start, e.g. `"Tue, 01 Nov 2011 09:00"`.
    pub start: String,
    pub end: Option<String>,
    /// Raw `DTSTART` value as found in the calendar.
    pub dtstart: String,
    pub dtend: Option<String>,
    /// `TZID` of the start time; `None` for all-day events.
    pub timezone: Option<String>,
    /// Comma-joined attendee names, the viewer marked with `(you)`.
    pub attendees: String,
    pub recurrence_description: Option<String>,
    pub raw_rrule: Option<String>,
}
