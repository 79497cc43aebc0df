//! Plain-text renderings of function results, used when the model's follow-up reply is blank.

use crate::errors::BookingError;
use crate::models::{AvailableSlot, BookingConfirmation, BusinessDetails};

pub fn render_businesses(businesses: &[BusinessDetails]) -> String {
    if businesses.is_empty() {
        return "I couldn't find any businesses at the moment.".to_string();
    }

    let mut out = String::from("Here are the businesses I found:\n");
    for details in businesses {
        let business = &details.business;
        out.push_str(&format!("\n**{}**", business.name));
        let about: Vec<&str> = [business.business_type.as_str(), business.city.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        if !about.is_empty() {
            out.push_str(&format!(" ({})", about.join(", ")));
        }
        out.push('\n');
        if !business.address.is_empty() {
            out.push_str(&format!("{}\n", business.address));
        }

        if details.services.is_empty() {
            out.push_str("No services listed.\n");
            continue;
        }
        out.push_str("Services:\n");
        for entry in &details.services {
            out.push_str(&format!(
                "- {}: {:.2}, {} min",
                entry.service.name, entry.service.price, entry.service.duration
            ));
            if !entry.service_staff_members.is_empty() {
                out.push_str(&format!(" (with {})", entry.service_staff_members.join(", ")));
            }
            out.push('\n');
        }
    }

    out.trim_end().to_string()
}

pub fn render_slots(business_name: &str, service_name: &str, date: &str, slots: &[AvailableSlot]) -> String {
    if slots.is_empty() {
        return format!(
            "Sorry, there are no available times for {service_name} at {business_name} on {date}. Would you like to try another day?"
        );
    }

    // Group by staff member, keeping first-seen order
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    for slot in slots {
        match groups.iter_mut().find(|(name, _)| *name == slot.staff_name) {
            Some((_, times)) => times.push(slot.start_time.as_str()),
            None => groups.push((slot.staff_name.as_str(), vec![slot.start_time.as_str()])),
        }
    }

    let mut out = format!("Available times for {service_name} at {business_name} on {date}:\n");
    for (staff_name, times) in groups {
        out.push_str(&format!("\n{staff_name}: {}", times.join(", ")));
    }
    out
}

pub fn render_booking(confirmation: &BookingConfirmation) -> String {
    confirmation.message.clone()
}

pub fn render_error(err: &BookingError) -> String {
    match err {
        BookingError::Unauthenticated => "Please sign in before booking an appointment.".to_string(),
        BookingError::NotFound(what) => {
            format!("I couldn't find {what}. Could you check the name and try again?")
        }
        BookingError::Conflict {
            staff_name,
            date,
            start_time,
        } => format!(
            "Sorry, {start_time} on {date} with {staff_name} is no longer available. Would you like me to look for other times?"
        ),
        BookingError::InvalidArgument(msg) => {
            format!("I couldn't use those details ({msg}). Could you rephrase the date or time?")
        }
        BookingError::Unavailable(_) => {
            "I'm having trouble reaching the booking system right now. Please try again in a moment."
                .to_string()
        }
    }
}
