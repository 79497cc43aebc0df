pub mod availability;
pub mod booking;
pub mod business;
pub mod conversation;
pub mod opening_hours;

pub use availability::{AvailableSlot, TimeSlot};
pub use booking::{Booking, BookingConfirmation, BookingStatus, PaymentStatus};
pub use business::{Business, BusinessDetails, Service, ServiceDetails, Staff};
pub use conversation::{AgentState, ConversationTurn, Role};
pub use opening_hours::{DayHours, OpeningHours};
