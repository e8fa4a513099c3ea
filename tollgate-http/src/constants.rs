//! Header names and defaults for the payment protocol over HTTP.

/// Request header carrying a base64-encoded payment proof.
pub const X_PAYMENT_HEADER: &str = "X-Payment";

/// Response header carrying a base64-encoded payment receipt.
pub const X_PAYMENT_RESPONSE_HEADER: &str = "X-Payment-Response";

/// CORS header exposing the receipt header to browser callers.
pub const ACCESS_CONTROL_EXPOSE_HEADERS: &str = "Access-Control-Expose-Headers";

/// Webhook header carrying the hex HMAC-SHA256 signature.
pub const WEBHOOK_SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Webhook header carrying the signing timestamp in unix seconds.
pub const WEBHOOK_TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

/// Webhook header carrying the event name.
pub const WEBHOOK_EVENT_HEADER: &str = "X-Webhook-Event";

/// HTTP 402 Payment Required status code.
pub const HTTP_STATUS_PAYMENT_REQUIRED: u16 = 402;

/// Default URL of a locally running facilitator.
pub const DEFAULT_FACILITATOR_URL: &str = "http://127.0.0.1:8402";

/// Default seconds an issued payment requirement stays payable.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
