use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Stored twice with the same id and payload: under the business and under the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub business_id: String,
    pub business_name: String,
    #[serde(default)]
    pub business_address: String,
    pub staff_id: String,
    pub staff_name: String,
    pub service_id: String,
    pub service_name: String,
    pub service_price: f64,
    pub service_duration: u32,
    pub user_id: String,
    #[serde(default)]
    pub user_email: Option<String>,
    pub date: NaiveDate,
    /// `HH:mm`, 24-hour.
    pub start_time: String,
    /// Minutes.
    pub duration: u32,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

/// What `create_booking` hands back: the stored booking plus a sentence for the user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingConfirmation {
    pub booking: Booking,
    pub message: String,
}
