//! Structured rejection bodies returned when a request is not admitted.

use crate::backend::ClientKey;
use actix_web::HttpResponse;
use chrono::NaiveTime;
use serde::Serialize;

const TIME_FORMAT: &str = "%H:%M:%S";

/// Body of the 403 response returned outside of the access hours.
#[derive(Debug, Serialize)]
pub struct GateRejection {
    pub error: &'static str,
    pub message: String,
    pub current_time: String,
}

/// Body of the 429 response returned when a client exceeds its rate limit.
#[derive(Debug, Serialize)]
pub struct RateLimitRejection<'a> {
    pub error: &'static str,
    pub message: String,
    pub limit: u64,
    /// Window length in seconds.
    pub window: u64,
    /// Seconds until a retry is expected to be admitted.
    pub retry_after: u64,
    pub client_key: &'a str,
}

pub fn forbidden_outside_hours(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> HttpResponse {
    HttpResponse::Forbidden().json(GateRejection {
        error: "Access denied",
        message: format!(
            "Access is only permitted between {} and {}",
            start.format(TIME_FORMAT),
            end.format(TIME_FORMAT)
        ),
        current_time: now.format(TIME_FORMAT).to_string(),
    })
}

pub fn too_many_requests(
    limit: u64,
    window_secs: u64,
    retry_after: u64,
    client_key: &ClientKey,
) -> HttpResponse {
    HttpResponse::TooManyRequests().json(RateLimitRejection {
        error: "Rate limit exceeded",
        message: format!(
            "You can only send {limit} requests every {window_secs} seconds, retry in {retry_after} seconds"
        ),
        limit,
        window: window_secs,
        retry_after,
        client_key: client_key.as_str(),
    })
}
