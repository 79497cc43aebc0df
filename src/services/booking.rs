use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use crate::db::{queries, DocumentStore};
use crate::errors::BookingError;
use crate::models::availability::{format_time, parse_time};
use crate::models::{
    AvailableSlot, Booking, BookingConfirmation, BookingStatus, Business, PaymentStatus, Service,
    Staff, TimeSlot,
};
use crate::services::auth::UserIdentity;
use crate::services::availability;

/// Slot search and booking creation, addressed by the names the model sees.
#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn DocumentStore>,
}

impl BookingService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn find_available_slots(
        &self,
        business_name: &str,
        service_name: &str,
        date: &str,
        staff_name: Option<&str>,
    ) -> Result<Vec<AvailableSlot>, BookingError> {
        let date = parse_date(date)?;
        let (business, service) = self.resolve(business_name, service_name).await?;
        let store = self.store.as_ref();

        let staff: Vec<Staff> = match staff_name.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => vec![self.resolve_staff(&business, name).await?],
            None => queries::list_staff(store, &business.id)
                .await
                .map_err(BookingError::unavailable)?
                .into_iter()
                .filter(|s| service.staff_ids.contains(&s.id))
                .collect(),
        };

        let bookings = queries::get_active_bookings_on(store, &business.id, date)
            .await
            .map_err(BookingError::unavailable)?;

        let slots = availability::compute_slots_for_staff(&business, &service, &staff, date, &bookings);

        tracing::info!(
            business = %business.name,
            service = %service.name,
            %date,
            staff_count = staff.len(),
            slots = slots.len(),
            "computed availability"
        );

        Ok(slots.iter().map(TimeSlot::to_available).collect())
    }

    pub async fn create_booking(
        &self,
        caller: Option<&UserIdentity>,
        business_name: &str,
        staff_name: &str,
        service_name: &str,
        date: &str,
        start_time: &str,
    ) -> Result<BookingConfirmation, BookingError> {
        let caller = caller.ok_or(BookingError::Unauthenticated)?;
        let date = parse_date(date)?;
        let start = parse_time(start_time).map_err(|e| BookingError::InvalidArgument(e.to_string()))?;
        let start_time = format_time(start);

        let (business, service) = self.resolve(business_name, service_name).await?;
        let staff = self.resolve_staff(&business, staff_name).await?;
        let store = self.store.as_ref();

        let conflict = || BookingError::Conflict {
            staff_name: staff.name.clone(),
            date: date.format("%Y-%m-%d").to_string(),
            start_time: start_time.clone(),
        };

        let duplicates =
            queries::get_confirmed_bookings_at(store, &business.id, &staff.id, date, &start_time)
                .await
                .map_err(BookingError::unavailable)?;
        if !duplicates.is_empty() {
            tracing::info!(staff = %staff.name, %date, %start_time, "slot already booked");
            return Err(conflict());
        }

        let end = start
            .checked_add(service.duration)
            .filter(|end| *end <= 24 * 60)
            .ok_or_else(|| {
                BookingError::InvalidArgument(format!(
                    "{} minutes of {} from {start_time} runs past the end of the day",
                    service.duration, service.name
                ))
            })?;
        let candidate = TimeSlot {
            staff_id: staff.id.clone(),
            staff_name: staff.name.clone(),
            start,
            end,
        };

        let now = Utc::now();
        let booking = Booking {
            id: uuid::Uuid::new_v4().to_string(),
            business_id: business.id.clone(),
            business_name: business.name.clone(),
            business_address: business.address.clone(),
            staff_id: staff.id.clone(),
            staff_name: staff.name.clone(),
            service_id: service.id.clone(),
            service_name: service.name.clone(),
            service_price: service.price,
            service_duration: service.duration,
            user_id: caller.user_id.clone(),
            user_email: caller.email.clone(),
            date,
            start_time: start_time.clone(),
            duration: service.duration,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Unpaid,
            created_at: now,
            updated_at: now,
        };

        // The slot may have been taken since it was offered
        let written = queries::create_booking_if_free(store, &booking, &candidate)
            .await
            .map_err(BookingError::unavailable)?;
        if !written {
            tracing::info!(staff = %staff.name, %date, %start_time, "slot overlaps an existing booking");
            return Err(conflict());
        }

        tracing::info!(
            booking_id = %booking.id,
            business = %booking.business_name,
            staff = %booking.staff_name,
            %date,
            %start_time,
            "created booking"
        );

        let message = confirmation_message(&booking);
        Ok(BookingConfirmation { booking, message })
    }

    async fn resolve(&self, business_name: &str, service_name: &str) -> Result<(Business, Service), BookingError> {
        let store = self.store.as_ref();
        let business = queries::find_business_by_name(store, business_name)
            .await
            .map_err(BookingError::unavailable)?
            .ok_or_else(|| BookingError::NotFound(format!("business \"{business_name}\"")))?;

        let service = queries::find_service_by_name(store, &business.id, service_name)
            .await
            .map_err(BookingError::unavailable)?
            .ok_or_else(|| {
                BookingError::NotFound(format!("service \"{service_name}\" at {}", business.name))
            })?;

        Ok((business, service))
    }

    async fn resolve_staff(&self, business: &Business, staff_name: &str) -> Result<Staff, BookingError> {
        queries::find_staff_by_name(self.store.as_ref(), &business.id, staff_name)
            .await
            .map_err(BookingError::unavailable)?
            .ok_or_else(|| BookingError::NotFound(format!("staff member \"{staff_name}\" at {}", business.name)))
    }
}

fn parse_date(date: &str) -> Result<NaiveDate, BookingError> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| BookingError::InvalidArgument(format!("date must be YYYY-MM-DD, got \"{date}\"")))
}

pub fn confirmation_message(booking: &Booking) -> String {
    format!(
        "Your {} appointment at {} is confirmed for {} at {} with {}.",
        booking.service_name,
        booking.business_name,
        booking.date.format("%A, %B %-d, %Y"),
        booking.start_time,
        booking.staff_name,
    )
}
