use crate::models::Booking;

const ICS_STAMP: &str = "%Y%m%dT%H%M%S";

/// Single-event iCalendar document for the appointment. Times are floating
/// (no TZID) because slots carry clinic-local wall-clock times.
pub fn generate_ics(booking: &Booking, clinic_name: &str) -> String {
    let dtstart = booking.starts_at().format(ICS_STAMP);
    let dtend = booking.ends_at().format(ICS_STAMP);
    let dtstamp = booking.created_at.format(ICS_STAMP);
    let uid = format!("{}@clinicbook", booking.id);

    let summary = escape_text(&format!("Appointment at {clinic_name}"));
    let mut description = format!("Client: {}", booking.client_name);
    if let Some(notes) = booking.notes.as_deref() {
        description.push('\n');
        description.push_str(notes);
    }
    let description = escape_text(&description);

    let lines = [
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//Clinicbook//Appointments//EN".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{uid}"),
        format!("DTSTAMP:{dtstamp}"),
        format!("DTSTART:{dtstart}"),
        format!("DTEND:{dtend}"),
        format!("SUMMARY:{summary}"),
        format!("DESCRIPTION:{description}"),
        format!("STATUS:{}", ics_status(booking)),
        "END:VEVENT".to_string(),
        "END:VCALENDAR".to_string(),
    ];

    let mut ics = String::new();
    for line in &lines {
        fold_line(&mut ics, line);
    }
    ics
}

/// Content lines longer than 75 octets continue on the next line after a
/// CRLF and a single space. Splits never land inside a UTF-8 sequence.
fn fold_line(out: &mut String, line: &str) {
    const MAX_OCTETS: usize = 75;

    let mut budget = MAX_OCTETS;
    let mut used = 0;
    for ch in line.chars() {
        if used + ch.len_utf8() > budget {
            out.push_str("\r\n ");
            // the leading space counts toward the continuation line
            budget = MAX_OCTETS - 1;
            used = 0;
        }
        out.push(ch);
        used += ch.len_utf8();
    }
    out.push_str("\r\n");
}

fn ics_status(booking: &Booking) -> &'static str {
    use crate::models::BookingStatus::*;
    match booking.status {
        Pending => "TENTATIVE",
        Confirmed | Completed => "CONFIRMED",
        Cancelled => "CANCELLED",
    }
}

// RFC 5545 TEXT escaping; bare CRs are dropped
fn escape_text(s: &str) -> String {
    s.replace("\r\n", "\n")
        .replace('\r', "")
        .replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::clock::{parse_date, parse_time};
    use crate::models::BookingStatus;
    use chrono::NaiveDateTime;

    fn booking(status: BookingStatus, notes: Option<&str>) -> Booking {
        let created = NaiveDateTime::parse_from_str("2025-03-10 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        Booking {
            id: "test-123".to_string(),
            slot_id: Some("slot-1".to_string()),
            city_id: "moscow".to_string(),
            date: parse_date("2025-03-15").unwrap(),
            start_time: parse_time("14:00").unwrap(),
            end_time: parse_time("15:00").unwrap(),
            service_id: None,
            client_name: "Ivan".to_string(),
            client_phone: "+79001234567".to_string(),
            client_email: None,
            status,
            notes: notes.map(str::to_string),
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn test_generate_ics() {
        let ics = generate_ics(&booking(BookingStatus::Confirmed, Some("Bring X-ray")), "Smile Clinic");
        assert!(ics.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(ics.contains("DTSTART:20250315T140000"));
        assert!(ics.contains("DTEND:20250315T150000"));
        assert!(ics.contains("DTSTAMP:20250310T100000"));
        assert!(ics.contains("SUMMARY:Appointment at Smile Clinic"));
        assert!(ics.contains("DESCRIPTION:Client: Ivan\\nBring X-ray"));
        assert!(ics.contains("UID:test-123@clinicbook"));
        assert!(ics.contains("STATUS:CONFIRMED"));
        assert!(ics.ends_with("END:VCALENDAR\r\n"));
    }

    #[test]
    fn test_pending_is_tentative_and_text_escaped() {
        let ics = generate_ics(&booking(BookingStatus::Pending, None), "Dr. Ivanova; Dentistry, Moscow");
        assert!(ics.contains("STATUS:TENTATIVE"));
        assert!(ics.contains("SUMMARY:Appointment at Dr. Ivanova\\; Dentistry\\, Moscow"));
        assert!(ics.contains("DESCRIPTION:Client: Ivan\r\n"));
    }

    #[test]
    fn test_carriage_returns_never_reach_text_values() {
        let ics = generate_ics(&booking(BookingStatus::Confirmed, Some("line one\r\nline two\rthree")), "Clinic");
        assert!(ics.contains("DESCRIPTION:Client: Ivan\\nline one\\nline twothree\r\n"));
        for line in ics.split("\r\n") {
            assert!(!line.contains('\r'));
        }
    }

    #[test]
    fn test_long_lines_are_folded() {
        let notes = "Пациент просит напомнить о приёме за день до визита. ".repeat(4);
        let ics = generate_ics(&booking(BookingStatus::Confirmed, Some(&notes)), "Clinic");
        for line in ics.split("\r\n") {
            assert!(line.len() <= 75, "line of {} octets: {line}", line.len());
        }

        let unfolded = ics.replace("\r\n ", "");
        assert!(unfolded.contains(&format!("DESCRIPTION:Client: Ivan\\n{notes}\r\n")));
    }
}
