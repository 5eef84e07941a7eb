use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub const fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: u64,
    pub database_ok: bool,
    pub processor_running: bool,
}

#[derive(Debug, Deserialize)]
pub struct MagicLinkRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ConsumeLinkRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub user_id: String,
    pub namespace: String,
    pub is_temporary: bool,
    pub vendor_context: Option<String>,
    pub csrf_token: String,
}

#[derive(Debug, Deserialize)]
pub struct VendorContextRequest {
    pub vendor_context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VendorContextResponse {
    pub vendor_context: Option<String>,
    pub sessions_updated: u64,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub challenges: usize,
    pub badges: usize,
    pub skipped: usize,
}
