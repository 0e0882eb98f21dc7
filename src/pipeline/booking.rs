//! Appointment-booking state machine.
//!
//! Intake → BookingRegion → BookingConsultationType → BookingPatientDetails
//! (name → age → phone → email, one per turn, strict order) →
//! BookingConfirmation → Completed. Declining at confirmation resets to
//! BookingRegion, clearing everything except the resolved specialty.

use crate::models::{ConsultationType, Stage};
use crate::session::Session;

/// Outcome of one booking-flow turn. `just_confirmed` tells the caller to
/// fire the best-effort clinician handoff exactly once.
#[derive(Debug)]
pub struct BookingTurn {
    pub reply: String,
    pub just_confirmed: bool,
}

impl BookingTurn {
    fn reply(reply: String) -> Self {
        Self {
            reply,
            just_confirmed: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Doctor directory
// ═══════════════════════════════════════════════════════════

/// Fixed directory: specialty × region → doctor. Stands in for a real
/// doctor/booking backend, which is out of scope.
static DOCTOR_DIRECTORY: &[(&str, &[(&str, &str)])] = &[
    ("Cardiology", &[
        ("Belgaum", "Dr. Vikram Joshi"),
        ("Hubli", "Dr. Priya Desai"),
        ("Dharwad", "Dr. Rajesh Patil"),
    ]),
    ("Gastroenterology", &[
        ("Belgaum", "Dr. Sunita Kulkarni"),
        ("Hubli", "Dr. Ravi Shetty"),
        ("Dharwad", "Dr. Priya Gowda"),
    ]),
    ("Neurology", &[
        ("Belgaum", "Dr. Anil Patil"),
        ("Hubli", "Dr. Meera Joshi"),
        ("Dharwad", "Dr. Suresh Kulkarni"),
    ]),
    ("Dermatology", &[
        ("Belgaum", "Dr. Kavita Patil"),
        ("Hubli", "Dr. Rajesh Shetty"),
        ("Dharwad", "Dr. Sunita Gowda"),
    ]),
    ("Orthopedics", &[
        ("Belgaum", "Dr. Suresh Patil"),
        ("Hubli", "Dr. Priya Joshi"),
        ("Dharwad", "Dr. Rajesh Kulkarni"),
    ]),
    ("Psychiatry", &[
        ("Belgaum", "Dr. Anitha Patil"),
        ("Hubli", "Dr. Vikram Shetty"),
        ("Dharwad", "Dr. Meera Gowda"),
    ]),
    ("Pulmonology", &[
        ("Belgaum", "Dr. Sunil Patil"),
        ("Hubli", "Dr. Kavita Joshi"),
        ("Dharwad", "Dr. Rajesh Shetty"),
    ]),
    ("Endocrinology", &[
        ("Belgaum", "Dr. Priya Patil"),
        ("Hubli", "Dr. Suresh Joshi"),
        ("Dharwad", "Dr. Anitha Kulkarni"),
    ]),
    ("Urology", &[
        ("Belgaum", "Dr. Vikram Patil"),
        ("Hubli", "Dr. Sunita Shetty"),
        ("Dharwad", "Dr. Rajesh Gowda"),
    ]),
    ("Ophthalmology", &[
        ("Belgaum", "Dr. Kavita Patil"),
        ("Hubli", "Dr. Suresh Joshi"),
        ("Dharwad", "Dr. Priya Shetty"),
    ]),
    ("General Practice", &[
        ("Belgaum", "Dr. Anil Patil"),
        ("Hubli", "Dr. Sunita Joshi"),
        ("Dharwad", "Dr. Rajesh Kulkarni"),
    ]),
];

const FALLBACK_DOCTOR: &str = "Dr. Available Specialist";

/// Suggest a doctor for a specialty + free-text region. Region matching is
/// fuzzy: case-insensitive substring in either direction. Unknown specialty
/// falls back to the General Practice roster; unknown region to a generic
/// placeholder.
pub fn doctor_suggestion(specialty: &str, region: &str) -> String {
    let roster = DOCTOR_DIRECTORY
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(specialty))
        .or_else(|| {
            DOCTOR_DIRECTORY
                .iter()
                .find(|(name, _)| *name == "General Practice")
        })
        .map(|(_, roster)| *roster)
        .unwrap_or(&[]);

    let region_lower = region.trim().to_lowercase();
    roster
        .iter()
        .find(|(city, _)| {
            let city_lower = city.to_lowercase();
            city_lower.contains(&region_lower) || region_lower.contains(&city_lower)
        })
        .map(|(_, doctor)| (*doctor).to_string())
        .unwrap_or_else(|| FALLBACK_DOCTOR.to_string())
}

// ═══════════════════════════════════════════════════════════
// Turn parsing
// ═══════════════════════════════════════════════════════════

pub fn parse_consultation_type(text: &str) -> ConsultationType {
    let t = text.to_lowercase();
    if t.contains("tele") || t.contains("video") || t.contains("online") {
        ConsultationType::Teleconsultation
    } else {
        ConsultationType::InPerson
    }
}

/// Case-insensitive substring match against the accept keywords.
pub fn is_confirmation(text: &str) -> bool {
    let t = text.to_lowercase();
    ["yes", "confirm", "book"].iter().any(|kw| t.contains(kw))
}

/// The message that opens the booking flow, also used by interactive
/// button replies that jump straight into it.
pub fn booking_start_reply(specialty: &str) -> String {
    format!(
        "Based on your symptoms, I recommend consulting with a {specialty} specialist. \
         To help you find the right doctor, which city or region are you located in?"
    )
}

fn booking_summary_reply(session: &Session) -> String {
    let booking = &session.booking;
    format!(
        "📋 Booking summary:\n\n\
         Doctor: {}\n\
         Specialty: {}\n\
         Location: {}\n\
         Type: {}\n\n\
         Please confirm by typing \"Yes\" to book your appointment.",
        booking.doctor_name.as_deref().unwrap_or(FALLBACK_DOCTOR),
        booking.specialty.as_deref().unwrap_or("General Practice"),
        booking.region.as_deref().unwrap_or("your region"),
        booking
            .consultation_type
            .map(ConsultationType::as_str)
            .unwrap_or("in-person"),
    )
}

// ═══════════════════════════════════════════════════════════
// State machine
// ═══════════════════════════════════════════════════════════

/// Advance the booking flow by one patient message. The caller holds the
/// session lock; clinical-field collection is frozen while in these stages.
pub fn apply_booking_turn(session: &mut Session, text: &str) -> BookingTurn {
    match session.stage {
        Stage::BookingRegion => {
            session.booking.region = Some(text.trim().to_string());
            // The doctor suggestion is computed exactly once, when region is
            // first supplied, and pinned for the remainder of the flow.
            if session.booking.doctor_name.is_none() {
                let specialty = session
                    .booking
                    .specialty
                    .clone()
                    .unwrap_or_else(|| "General Practice".to_string());
                session.booking.doctor_name = Some(doctor_suggestion(&specialty, text));
            }
            session.stage = Stage::BookingConsultationType;
            BookingTurn::reply(format!(
                "Great! I found {}, a {} specialist in {}. Would you prefer a teleconsultation \
                 or an in-person visit?",
                session.booking.doctor_name.as_deref().unwrap_or(FALLBACK_DOCTOR),
                session.booking.specialty.as_deref().unwrap_or("General Practice"),
                session.booking.region.as_deref().unwrap_or("your region"),
            ))
        }

        Stage::BookingConsultationType => {
            let kind = parse_consultation_type(text);
            session.booking.consultation_type = Some(kind);
            session.stage = Stage::BookingPatientDetails;
            BookingTurn::reply(format!(
                "Perfect! You've chosen {}. Now I need some details to complete your booking. \
                 What's your full name?",
                kind.as_str()
            ))
        }

        Stage::BookingPatientDetails => {
            let details = &mut session.booking.patient;
            if details.name.is_none() {
                details.name = Some(text.trim().to_string());
                BookingTurn::reply(format!("Thank you, {}. What's your age?", text.trim()))
            } else if details.age.is_none() {
                details.age = Some(text.trim().to_string());
                BookingTurn::reply("Got it. What's your phone number?".to_string())
            } else if details.phone.is_none() {
                details.phone = Some(text.trim().to_string());
                BookingTurn::reply("And your email address?".to_string())
            } else {
                details.email = Some(text.trim().to_string());
                session.stage = Stage::BookingConfirmation;
                BookingTurn::reply(booking_summary_reply(session))
            }
        }

        Stage::BookingConfirmation => {
            if is_confirmation(text) {
                session.booking_confirmed = true;
                session.stage = Stage::Completed;
                BookingTurn {
                    reply: "✅ Booking confirmed! You'll receive appointment details within \
                            2 hours."
                        .to_string(),
                    just_confirmed: true,
                }
            } else {
                session.stage = Stage::BookingRegion;
                session.booking.reset_keeping_specialty();
                BookingTurn::reply(
                    "No problem. Let's start over. Which city or region are you located in?"
                        .to_string(),
                )
            }
        }

        // Not a booking stage; nothing sensible to do here.
        Stage::Intake | Stage::Completed => BookingTurn::reply(
            "I understand. Could you please provide the information I asked for?".to_string(),
        ),
    }
}
