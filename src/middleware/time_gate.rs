use crate::audit::AuditLog;
use crate::gate::{GateConfig, TimeWindowGate};
use crate::response::forbidden_outside_hours;
use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::HttpResponse;
use chrono::NaiveTime;
use futures::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;

type Clock = dyn Fn() -> NaiveTime;
type DeniedResponse = dyn Fn(&GateDenial) -> HttpResponse;

/// Passed to the denied response of a [TimeGate].
#[derive(Debug, Clone, Copy)]
pub struct GateDenial {
    /// The time of day the request arrived at.
    pub current_time: NaiveTime,
    pub config: GateConfig,
}

/// Time of day access middleware, rejecting every request outside of the configured hours.
///
/// Register it after (i.e. outside of) a [RateLimiter](crate::RateLimiter) so that requests
/// denied here never count against a rate limit.
#[derive(Clone)]
pub struct TimeGate {
    gate: TimeWindowGate,
    clock: Rc<Clock>,
    denied_response: Rc<DeniedResponse>,
    audit: Option<AuditLog>,
}

impl TimeGate {
    pub fn builder(config: GateConfig) -> TimeGateBuilder {
        TimeGateBuilder {
            gate: TimeWindowGate::new(config),
            clock: Rc::new(|| chrono::Local::now().time()),
            denied_response: Rc::new(|denial: &GateDenial| {
                forbidden_outside_hours(
                    denial.current_time,
                    denial.config.start_time,
                    denial.config.end_time,
                )
            }),
            audit: None,
        }
    }
}

pub struct TimeGateBuilder {
    gate: TimeWindowGate,
    clock: Rc<Clock>,
    denied_response: Rc<DeniedResponse>,
    audit: Option<AuditLog>,
}

impl TimeGateBuilder {
    /// Source of the current time of day.
    ///
    /// Defaults to the local wall clock.
    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Fn() -> NaiveTime + 'static,
    {
        self.clock = Rc::new(clock);
        self
    }

    /// In the event that the request is denied, configure the [HttpResponse] returned.
    ///
    /// Defaults to status 403 with a JSON body of the form `{error, message, current_time}`.
    pub fn denied_response<R>(mut self, denied_response: R) -> Self
    where
        R: Fn(&GateDenial) -> HttpResponse + 'static,
    {
        self.denied_response = Rc::new(denied_response);
        self
    }

    /// Write a request log line for every denied request.
    pub fn audit(mut self, log: AuditLog) -> Self {
        self.audit = Some(log);
        self
    }

    pub fn build(self) -> TimeGate {
        TimeGate {
            gate: self.gate,
            clock: self.clock,
            denied_response: self.denied_response,
            audit: self.audit,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for TimeGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = TimeGateMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(TimeGateMiddleware {
            service: Rc::new(service),
            inner: self.clone(),
        })
    }
}

pub struct TimeGateMiddleware<S> {
    service: Rc<S>,
    inner: TimeGate,
}

impl<S, B> Service<ServiceRequest> for TimeGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let current_time = (self.inner.clock)();
        let decision = self.inner.gate.admit(current_time);

        if decision.is_denied() {
            let denial = GateDenial {
                current_time,
                config: self.inner.gate.config(),
            };
            if let Some(audit) = &self.inner.audit {
                let event = format!(
                    "Access denied outside {} - {}",
                    denial.config.start_time, denial.config.end_time
                );
                audit.record(&req, Some(&event));
            }
            let response = (self.inner.denied_response)(&denial);
            return Box::pin(ok(req.into_response(response).map_into_right_body()));
        }

        let service = self.service.clone();
        Box::pin(async move {
            let service_response = service.call(req).await?;
            Ok(service_response.map_into_left_body())
        })
    }
}
