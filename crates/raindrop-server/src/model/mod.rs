use jiff::Timestamp;
use raindrop_worker::IdParts;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct IdResponse {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Serialize)]
pub struct DecodedIdResponse {
    pub id: i64,
    #[serde(flatten)]
    pub parts: IdParts,
    /// Start of the tick the id was minted in.
    pub timestamp: Option<Timestamp>,
}
