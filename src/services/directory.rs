use std::sync::Arc;

use crate::db::{queries, DocumentStore};
use crate::errors::BookingError;
use crate::models::BusinessDetails;

/// Read-only view of the business directory.
#[derive(Clone)]
pub struct DirectoryService {
    store: Arc<dyn DocumentStore>,
}

impl DirectoryService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Every business with its services and staff. An empty directory is `Ok(vec![])`;
    /// only store failures are errors.
    pub async fn list_businesses_with_details(&self) -> Result<Vec<BusinessDetails>, BookingError> {
        let store = self.store.as_ref();
        let businesses = queries::list_businesses(store)
            .await
            .map_err(BookingError::unavailable)?;

        let mut details = Vec::with_capacity(businesses.len());
        for business in businesses {
            let services = queries::list_services(store, &business.id)
                .await
                .map_err(BookingError::unavailable)?;
            let staff = queries::list_staff(store, &business.id)
                .await
                .map_err(BookingError::unavailable)?;
            details.push(BusinessDetails::new(business, services, staff));
        }

        tracing::debug!(count = details.len(), "listed businesses");
        Ok(details)
    }
}
