use chrono::Weekday;
use serde::{Deserialize, Serialize};

use super::opening_hours::{weekday_names, OpeningHours};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Business {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub business_type: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub review_count: u32,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub opening_hours: OpeningHours,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub price: f64,
    /// Minutes.
    pub duration: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub staff_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Staff {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default, with = "weekday_names")]
    pub working_days: Vec<Weekday>,
}

impl Staff {
    pub fn works_on(&self, day: Weekday) -> bool {
        self.working_days.contains(&day)
    }
}

/// A service with the names of the staff who can perform it resolved inline.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDetails {
    #[serde(flatten)]
    pub service: Service,
    pub service_staff_members: Vec<String>,
}

/// A business with its services and staff, in the shape handed to the model.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BusinessDetails {
    #[serde(flatten)]
    pub business: Business,
    pub services: Vec<ServiceDetails>,
    pub staff: Vec<Staff>,
}

impl BusinessDetails {
    pub fn new(business: Business, services: Vec<Service>, staff: Vec<Staff>) -> Self {
        let services = services
            .into_iter()
            .map(|service| {
                let service_staff_members = service
                    .staff_ids
                    .iter()
                    .filter_map(|id| staff.iter().find(|s| &s.id == id))
                    .map(|s| s.name.clone())
                    .collect();
                ServiceDetails {
                    service,
                    service_staff_members,
                }
            })
            .collect();

        Self {
            business,
            services,
            staff,
        }
    }
}
