use serde::Deserialize;
use tokio::sync::oneshot;

/// The `http_response` control frame, decoded body still base64.
#[derive(Debug, Deserialize)]
pub struct HttpResponseFrame {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// One outstanding tunneled request awaiting its WAF's response.
pub struct PendingRequest {
    pub resolve: oneshot::Sender<HttpResponseFrame>,
}
