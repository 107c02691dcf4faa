#![cfg_attr(docsrs, feature(doc_cfg))]
//! Request admission middleware for actix-web: a time of day access gate and a per-client
//! sliding window rate limiter.
//!
//! Wrap the rate limiter first and the gate last, so that the gate runs first and requests
//! outside of the access hours never count against a client's rate limit:
//!
//! ```no_run
//! # use actix_admission_control::backend::ClientKeyFunctionBuilder;
//! # use actix_admission_control::settings::AdmissionSettings;
//! # use actix_admission_control::{RateLimiter, RequestLogger, TimeGate};
//! # use actix_web::{App, HttpServer};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = AdmissionSettings::load(Some("admission.toml"))?;
//! settings.validate()?;
//! // Built once, so that every worker shares the same rate limit state.
//! let backend = settings.sliding_window_backend()?;
//! HttpServer::new(move || {
//!     let limiter = RateLimiter::builder(backend.clone(), ClientKeyFunctionBuilder::new().build())
//!         .endpoint_classifier(settings.endpoint_classifier().unwrap())
//!         .json_rejection()
//!         .add_headers()
//!         .build();
//!     App::new()
//!         .wrap(limiter)
//!         .wrap(TimeGate::builder(settings.gate_config().unwrap()).build())
//!         .wrap(RequestLogger::default())
//! })
//! .bind(("127.0.0.1", 8080))?
//! .run()
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod backend;
pub mod classifier;
pub mod error;
pub mod gate;
mod middleware;
pub mod response;
pub mod settings;

pub use middleware::builder::{LimitOutput, RateLimiterBuilder};
pub use middleware::request_log::RequestLogger;
pub use middleware::time_gate::{GateDenial, TimeGate, TimeGateBuilder};
pub use middleware::RateLimiter;
