/// Subject and HTML body for each notification
use super::{Notification, ScheduleNotice, TicketEvent, TicketNotice};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M %Z";

/// Render `(subject, html)` for a notification
pub fn render(notification: &Notification) -> (String, String) {
    match notification {
        Notification::Schedule(notice) => render_schedule(notice),
        Notification::Ticket(notice) => render_ticket(notice),
    }
}

fn render_schedule(notice: &ScheduleNotice) -> (String, String) {
    let action = notice.action.as_str();
    let start = notice.start.with_timezone(&notice.tz).format(TIME_FORMAT).to_string();
    let end = notice.end.with_timezone(&notice.tz).format(TIME_FORMAT).to_string();

    let subject = format!("Schedule {} for {}", action, notice.technician.username);

    let mut html = format!(
        "<h3>Schedule {action}</h3>\n\
         <p>A schedule has been {action} with the following details:</p>\n\
         <ul>\n\
         <li><strong>Technician:</strong> {technician}</li>\n\
         <li><strong>Time:</strong> from {start} to {end}</li>\n\
         <li><strong>Location:</strong> {location}</li>\n\
         <li><strong>Description:</strong> {description}</li>\n",
        action = action,
        technician = escape_html(&notice.technician.username),
        start = start,
        end = end,
        location = notice
            .location
            .as_deref()
            .map(escape_html)
            .unwrap_or_else(|| "No location".to_string()),
        description = if notice.description.trim().is_empty() {
            "No description".to_string()
        } else {
            escape_html(&notice.description)
        },
    );
    if notice.time_off {
        html.push_str("<li><strong>Type:</strong> Time off</li>\n");
    }
    html.push_str("</ul>\n");

    if let Some(info) = &notice.additional_info {
        html.push_str(&format!(
            "<p><strong>Additional Information:</strong> {}</p>\n",
            escape_html(info)
        ));
    }

    (subject, html)
}

fn render_ticket(notice: &TicketNotice) -> (String, String) {
    let ticket = &notice.ticket;
    let (subject, headline, detail) = match &notice.event {
        TicketEvent::Assigned { note } => (
            format!("Ticket #{} assigned: {}", ticket.id, ticket.title),
            format!("{} assigned this ticket to you.", escape_html(&notice.actor)),
            note.as_deref().map(|n| ("Note", n)),
        ),
        TicketEvent::Commented { content } => (
            format!("New comment on ticket #{}: {}", ticket.id, ticket.title),
            format!("{} commented on this ticket.", escape_html(&notice.actor)),
            Some(("Comment", content.as_str())),
        ),
        TicketEvent::StatusChanged { from, to, comment } => (
            format!("Ticket #{} status changed to {}", ticket.id, to),
            format!(
                "{} changed the status from {} to {}.",
                escape_html(&notice.actor),
                from,
                to
            ),
            comment.as_deref().map(|c| ("Comment", c)),
        ),
    };

    let mut html = format!(
        "<h3>Ticket #{id}: {title}</h3>\n\
         <p>{headline}</p>\n\
         <ul>\n\
         <li><strong>Status:</strong> {status}</li>\n\
         <li><strong>Priority:</strong> {priority}</li>\n\
         <li><strong>Category:</strong> {category}</li>\n\
         </ul>\n",
        id = ticket.id,
        title = escape_html(&ticket.title),
        headline = headline,
        status = ticket.status,
        priority = ticket.priority,
        category = escape_html(&ticket.category),
    );
    if let Some((label, text)) = detail {
        html.push_str(&format!(
            "<p><strong>{}:</strong> {}</p>\n",
            label,
            escape_html(text)
        ));
    }

    (subject, html)
}

/// Escape text for inclusion in HTML element content
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Recipient, ScheduleAction, TicketSummary};
    use chrono::{TimeZone, Utc};

    fn technician() -> Recipient {
        Recipient {
            username: "tech1".to_string(),
            email: "tech1@example.com".to_string(),
        }
    }

    #[test]
    fn test_schedule_email_uses_technician_timezone() {
        let notice = ScheduleNotice {
            action: ScheduleAction::Created,
            technician: technician(),
            start: Utc.with_ymd_and_hms(2024, 1, 15, 15, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 15, 23, 0, 0).unwrap(),
            tz: chrono_tz::America::Chicago,
            location: None,
            description: String::new(),
            time_off: false,
            additional_info: Some("Schedule created by admin".to_string()),
        };

        let (subject, html) = render(&Notification::Schedule(notice));
        assert_eq!(subject, "Schedule created for tech1");
        assert!(html.contains("from 2024-01-15 09:00 CST to 2024-01-15 17:00 CST"));
        assert!(html.contains("No location"));
        assert!(html.contains("No description"));
        assert!(html.contains("Schedule created by admin"));
    }

    #[test]
    fn test_ticket_email_escapes_content() {
        let notice = TicketNotice {
            event: TicketEvent::Commented {
                content: "<script>alert(1)</script>".to_string(),
            },
            ticket: TicketSummary {
                id: 7,
                title: "VPN down".to_string(),
                status: "open".to_string(),
                priority: "High".to_string(),
                category: "Network".to_string(),
            },
            assignee: Some(technician()),
            actor: "admin".to_string(),
        };

        let (subject, html) = render(&Notification::Ticket(notice));
        assert_eq!(subject, "New comment on ticket #7: VPN down");
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }
}
