/// Phrases that claim an appointment now exists. Matched case-insensitively.
const BOOKING_CLAIMS: &[&str] = &[
    "successfully created your booking",
    "successfully booked",
    "created your booking",
    "made your booking",
    "booked your appointment",
    "booking is confirmed",
    "booking has been confirmed",
    "booking has been created",
    "booking confirmed",
    "appointment is confirmed",
    "appointment has been confirmed",
    "appointment has been booked",
    "appointment confirmed",
    "you're booked",
    "you are booked",
    "i've booked",
    "i have booked",
    "your booking is complete",
];

/// Injected into history when the model narrates a booking without calling `create_booking`.
pub const CORRECTION_NOTE: &str = "[System note] Your previous reply said an appointment was booked, but create_booking was never called, so nothing was booked. Do not claim a booking exists. If the user wants to book and you have every detail, call create_booking now; otherwise ask for what is missing.";

pub fn claims_booking_success(text: &str) -> bool {
    let normalized = text.to_lowercase().replace('\u{2019}', "'");
    BOOKING_CLAIMS.iter().any(|phrase| normalized.contains(phrase))
}
