use serde::Deserialize;
use serde_json::json;

use super::{FunctionCall, FunctionDeclaration};

pub const LIST_BUSINESSES: &str = "list_businesses";
pub const FIND_AVAILABLE_SLOTS: &str = "find_available_slots";
pub const CREATE_BOOKING: &str = "create_booking";

pub fn declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: LIST_BUSINESSES,
            description: "List every business in the directory with its address, opening hours, services (name, price, duration, qualified staff) and staff.",
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "dummy": {
                        "type": "STRING",
                        "description": "Unused. Leave empty."
                    }
                }
            }),
        },
        FunctionDeclaration {
            name: FIND_AVAILABLE_SLOTS,
            description: "Find open appointment times for a service at a business on a date, optionally with a specific staff member.",
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "businessName": {
                        "type": "STRING",
                        "description": "Exact business name as returned by list_businesses."
                    },
                    "serviceName": {
                        "type": "STRING",
                        "description": "Exact service name as returned by list_businesses."
                    },
                    "date": {
                        "type": "STRING",
                        "description": "Date in YYYY-MM-DD format."
                    },
                    "staffName": {
                        "type": "STRING",
                        "description": "Exact staff member name. Omit to check every qualified staff member."
                    }
                },
                "required": ["businessName", "serviceName", "date"]
            }),
        },
        FunctionDeclaration {
            name: CREATE_BOOKING,
            description: "Book an appointment for the signed-in user. Only call with a slot returned by find_available_slots.",
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "businessName": {
                        "type": "STRING",
                        "description": "Exact business name as returned by list_businesses."
                    },
                    "staffName": {
                        "type": "STRING",
                        "description": "Exact staff member name from find_available_slots."
                    },
                    "serviceName": {
                        "type": "STRING",
                        "description": "Exact service name as returned by list_businesses."
                    },
                    "date": {
                        "type": "STRING",
                        "description": "Date in YYYY-MM-DD format."
                    },
                    "startTime": {
                        "type": "STRING",
                        "description": "Start time in 24-hour HH:mm format."
                    }
                },
                "required": ["businessName", "staffName", "serviceName", "date", "startTime"]
            }),
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindSlotsArgs {
    pub business_name: String,
    pub service_name: String,
    pub date: String,
    #[serde(default)]
    pub staff_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingArgs {
    pub business_name: String,
    pub staff_name: String,
    pub service_name: String,
    pub date: String,
    pub start_time: String,
}

/// A function call the engine knows how to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentCall {
    ListBusinesses,
    FindAvailableSlots(FindSlotsArgs),
    CreateBooking(CreateBookingArgs),
}

impl AgentCall {
    pub fn parse(call: &FunctionCall) -> anyhow::Result<Self> {
        let args = if call.args.is_null() {
            json!({})
        } else {
            call.args.clone()
        };

        match call.name.as_str() {
            LIST_BUSINESSES => Ok(AgentCall::ListBusinesses),
            FIND_AVAILABLE_SLOTS => Ok(AgentCall::FindAvailableSlots(
                serde_json::from_value(args)
                    .map_err(|e| anyhow::anyhow!("invalid arguments for {FIND_AVAILABLE_SLOTS}: {e}"))?,
            )),
            CREATE_BOOKING => Ok(AgentCall::CreateBooking(
                serde_json::from_value(args)
                    .map_err(|e| anyhow::anyhow!("invalid arguments for {CREATE_BOOKING}: {e}"))?,
            )),
            other => Err(anyhow::anyhow!("unknown function: {other}")),
        }
    }
}
