use chrono::NaiveDate;
use serde_json::json;

use super::store::{Document, DocumentStore, WriteBatch};
use crate::models::{Booking, BookingStatus, Business, Service, Staff, TimeSlot};
use crate::services::availability;

// ── Collection paths ──

pub const BUSINESSES: &str = "businesses";

pub fn services_path(business_id: &str) -> String {
    format!("{BUSINESSES}/{business_id}/services")
}

pub fn staff_path(business_id: &str) -> String {
    format!("{BUSINESSES}/{business_id}/staff")
}

pub fn business_bookings_path(business_id: &str) -> String {
    format!("{BUSINESSES}/{business_id}/bookings")
}

pub fn user_bookings_path(user_id: &str) -> String {
    format!("users/{user_id}/bookings")
}

// ── Directory ──

pub async fn list_businesses(store: &dyn DocumentStore) -> anyhow::Result<Vec<Business>> {
    store
        .scan(BUSINESSES)
        .await?
        .into_iter()
        .map(|doc| doc.decode())
        .collect()
}

pub async fn find_business_by_name(
    store: &dyn DocumentStore,
    name: &str,
) -> anyhow::Result<Option<Business>> {
    let docs = store.query_eq(BUSINESSES, &[("name", json!(name))]).await?;
    docs.into_iter().next().map(|doc| doc.decode()).transpose()
}

pub async fn list_services(store: &dyn DocumentStore, business_id: &str) -> anyhow::Result<Vec<Service>> {
    store
        .scan(&services_path(business_id))
        .await?
        .into_iter()
        .map(|doc| doc.decode())
        .collect()
}

pub async fn find_service_by_name(
    store: &dyn DocumentStore,
    business_id: &str,
    name: &str,
) -> anyhow::Result<Option<Service>> {
    let docs = store
        .query_eq(&services_path(business_id), &[("name", json!(name))])
        .await?;
    docs.into_iter().next().map(|doc| doc.decode()).transpose()
}

pub async fn list_staff(store: &dyn DocumentStore, business_id: &str) -> anyhow::Result<Vec<Staff>> {
    store
        .scan(&staff_path(business_id))
        .await?
        .into_iter()
        .map(|doc| doc.decode())
        .collect()
}

pub async fn find_staff_by_name(
    store: &dyn DocumentStore,
    business_id: &str,
    name: &str,
) -> anyhow::Result<Option<Staff>> {
    let docs = store
        .query_eq(&staff_path(business_id), &[("name", json!(name))])
        .await?;
    docs.into_iter().next().map(|doc| doc.decode()).transpose()
}

// ── Bookings ──

/// Non-cancelled bookings for a business on one date.
pub async fn get_active_bookings_on(
    store: &dyn DocumentStore,
    business_id: &str,
    date: NaiveDate,
) -> anyhow::Result<Vec<Booking>> {
    let docs = store
        .query_eq(
            &business_bookings_path(business_id),
            &[("date", json!(date.format("%Y-%m-%d").to_string()))],
        )
        .await?;

    let mut bookings = vec![];
    for doc in docs {
        let booking: Booking = doc.decode()?;
        if booking.status != BookingStatus::Cancelled {
            bookings.push(booking);
        }
    }
    Ok(bookings)
}

/// Confirmed bookings holding exactly this staff member, date and start time.
pub async fn get_confirmed_bookings_at(
    store: &dyn DocumentStore,
    business_id: &str,
    staff_id: &str,
    date: NaiveDate,
    start_time: &str,
) -> anyhow::Result<Vec<Booking>> {
    store
        .query_eq(
            &business_bookings_path(business_id),
            &[
                ("date", json!(date.format("%Y-%m-%d").to_string())),
                ("startTime", json!(start_time)),
                ("staffId", json!(staff_id)),
                ("status", json!(BookingStatus::Confirmed.as_str())),
            ],
        )
        .await?
        .into_iter()
        .map(|doc| doc.decode())
        .collect()
}

/// Writes the business copy and the user copy of a booking in one atomic batch. The overlap
/// check against the business's bookings for that date runs in the same transaction as the
/// writes. Returns false, writing nothing, when `slot` is already taken.
pub async fn create_booking_if_free(
    store: &dyn DocumentStore,
    booking: &Booking,
    slot: &TimeSlot,
) -> anyhow::Result<bool> {
    let data = serde_json::to_value(booking)?;
    let mut batch = WriteBatch::new();
    batch
        .set(business_bookings_path(&booking.business_id), &booking.id, data.clone())
        .set(user_bookings_path(&booking.user_id), &booking.id, data);

    let date = booking.date;
    let accept = |docs: &[Document]| {
        let mut existing = Vec::with_capacity(docs.len());
        for doc in docs {
            match doc.clone().decode::<Booking>() {
                Ok(b) => existing.push(b),
                Err(e) => {
                    tracing::warn!(booking_id = %doc.id, error = %e, "unreadable booking blocks the day");
                    return false;
                }
            }
        }
        availability::is_slot_free(slot, date, &existing)
    };
    store
        .commit_if(
            batch,
            &business_bookings_path(&booking.business_id),
            &[("date", json!(date.format("%Y-%m-%d").to_string()))],
            &accept,
        )
        .await
}

pub async fn get_user_bookings(store: &dyn DocumentStore, user_id: &str) -> anyhow::Result<Vec<Booking>> {
    store
        .scan(&user_bookings_path(user_id))
        .await?
        .into_iter()
        .map(|doc| doc.decode())
        .collect()
}
