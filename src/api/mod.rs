// API module - read-only status endpoints

pub mod rest;

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct DevicesResponse {
    pub hostname: String,
    /// Current dial-priority order
    pub devices: Vec<String>,
    pub preferred: Vec<String>,
    pub refreshed_at: Option<String>,
}
