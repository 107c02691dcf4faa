use crate::audit::AuditLog;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use futures::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;

/// Logs the user and path of every request before forwarding it unchanged.
#[derive(Clone, Default)]
pub struct RequestLogger {
    log: AuditLog,
}

impl RequestLogger {
    pub fn new(log: AuditLog) -> Self {
        Self { log }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Transform = RequestLoggerMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequestLoggerMiddleware {
            service: Rc::new(service),
            log: self.log.clone(),
        })
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: Rc<S>,
    log: AuditLog,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        self.log.record(&req, None);
        Box::pin(self.service.call(req))
    }
}
