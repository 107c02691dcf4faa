pub mod builder;
pub mod request_log;
pub mod time_gate;

use crate::backend::{Backend, Decision};
use crate::classifier::EndpointClassifier;
use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::HeaderMap;
use actix_web::HttpResponse;
use builder::RateLimiterBuilder;
use futures::future::{ok, LocalBoxFuture, Ready};
use std::{future::Future, rc::Rc};

type AllowedTransformation<BO> = dyn Fn(&mut HeaderMap, Option<&BO>);
type DeniedResponse<BO> = dyn Fn(&BO) -> HttpResponse;
type DecisionHook<BO> = dyn Fn(&ServiceRequest, Decision, &BO);

/// Sliding window admission middleware.
///
/// Requests to endpoints outside the classifier (when one is configured) pass straight
/// through. Everything else is keyed by `input_fn` and counted by the backend.
pub struct RateLimiter<BA, BO, F> {
    backend: BA,
    input_fn: Rc<F>,
    fail_open: bool,
    classifier: Option<Rc<EndpointClassifier>>,
    allowed_transformation: Option<Rc<AllowedTransformation<BO>>>,
    denied_response: Rc<DeniedResponse<BO>>,
    decision_hook: Option<Rc<DecisionHook<BO>>>,
}

impl<BA, BI, BO, F, O> Clone for RateLimiter<BA, BO, F>
where
    BA: Backend<BI> + 'static,
    BI: 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<BI, actix_web::Error>>,
{
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            input_fn: Rc::clone(&self.input_fn),
            fail_open: self.fail_open,
            classifier: self.classifier.clone(),
            allowed_transformation: self.allowed_transformation.clone(),
            denied_response: Rc::clone(&self.denied_response),
            decision_hook: self.decision_hook.clone(),
        }
    }
}

impl<BA, BI, BO, F, O> RateLimiter<BA, BO, F>
where
    BA: Backend<BI, Output = BO> + 'static,
    BI: 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<BI, actix_web::Error>>,
{
    /// # Arguments
    ///
    /// * `backend`: Where admissions are counted, shared by every worker.
    /// * `input_fn`: Derives the client key from an incoming request.
    pub fn builder(backend: BA, input_fn: F) -> RateLimiterBuilder<BA, BO, F> {
        RateLimiterBuilder::new(backend, input_fn)
    }

    fn is_protected(&self, path: &str) -> bool {
        self.classifier
            .as_ref()
            .map_or(true, |classifier| classifier.is_rate_limited_endpoint(path))
    }
}

impl<S, B, BA, BI, BO, BE, F, O> Transform<S, ServiceRequest> for RateLimiter<BA, BO, F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    BA: Backend<BI, Output = BO, Error = BE> + 'static,
    BI: 'static,
    BO: 'static,
    BE: Into<actix_web::Error> + std::fmt::Display + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<BI, actix_web::Error>>,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = RateLimiterMiddleware<S, BA, BO, F>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimiterMiddleware {
            service: Rc::new(service),
            limiter: self.clone(),
        })
    }
}

pub struct RateLimiterMiddleware<S, BA, BO, F> {
    service: Rc<S>,
    limiter: RateLimiter<BA, BO, F>,
}

impl<S, B, BA, BI, BO, BE, F, O> Service<ServiceRequest> for RateLimiterMiddleware<S, BA, BO, F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
    BA: Backend<BI, Output = BO, Error = BE> + 'static,
    BI: 'static,
    BO: 'static,
    BE: Into<actix_web::Error> + std::fmt::Display + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<BI, actix_web::Error>>,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let limiter = self.limiter.clone();

        Box::pin(async move {
            if !limiter.is_protected(req.path()) {
                let response = service.call(req).await?;
                return Ok(response.map_into_left_body());
            }

            let key = match (limiter.input_fn)(&req).await {
                Ok(key) => key,
                Err(e) => {
                    log::error!("Could not derive a client key for {}: {e}", req.path());
                    let response = e.error_response();
                    return Ok(reject(req, response));
                }
            };

            let admitted = match limiter.backend.request(key).await {
                Ok((decision, output)) => {
                    if let Some(hook) = &limiter.decision_hook {
                        hook(&req, decision, &output);
                    }
                    if decision.is_denied() {
                        let response = (limiter.denied_response)(&output);
                        return Ok(reject(req, response));
                    }
                    Some(output)
                }
                // Nothing was counted for this request
                Err(e) if limiter.fail_open => {
                    log::warn!("Admission check failed, admitting {} anyway: {e}", req.path());
                    None
                }
                Err(e) => {
                    log::error!("Admission check failed for {}: {e}", req.path());
                    let error: actix_web::Error = e.into();
                    return Ok(reject(req, error.error_response()));
                }
            };

            let mut response = service.call(req).await?;
            if let Some(transformation) = &limiter.allowed_transformation {
                transformation(response.headers_mut(), admitted.as_ref());
            }
            Ok(response.map_into_left_body())
        })
    }
}

fn reject<B>(req: ServiceRequest, response: HttpResponse) -> ServiceResponse<EitherBody<B>> {
    req.into_response(response).map_into_right_body()
}
