use crate::audit::AuditLog;
use crate::backend::{Backend, ClientKey, Decision};
use crate::classifier::EndpointClassifier;
use crate::middleware::{AllowedTransformation, DecisionHook, DeniedResponse, RateLimiter};
use crate::response::too_many_requests;
use actix_web::dev::ServiceRequest;
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use std::future::Future;
use std::rc::Rc;

pub static X_RATELIMIT_LIMIT: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-limit"));

pub static X_RATELIMIT_REMAINING: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-remaining"));

pub static X_RATELIMIT_RESET: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-reset"));

pub struct RateLimiterBuilder<BE, BO, F> {
    backend: BE,
    input_fn: F,
    fail_open: bool,
    classifier: Option<Rc<EndpointClassifier>>,
    allowed_transformation: Option<Rc<AllowedTransformation<BO>>>,
    denied_response: Rc<DeniedResponse<BO>>,
    decision_hook: Option<Rc<DecisionHook<BO>>>,
}

impl<BE, BI, BO, F, O> RateLimiterBuilder<BE, BO, F>
where
    BE: Backend<BI, Output = BO> + 'static,
    BI: 'static,
    F: Fn(&ServiceRequest) -> O,
    O: Future<Output = Result<BI, actix_web::Error>>,
{
    pub(super) fn new(backend: BE, input_fn: F) -> Self {
        Self {
            backend,
            input_fn,
            fail_open: false,
            classifier: None,
            allowed_transformation: None,
            denied_response: Rc::new(|_| HttpResponse::TooManyRequests().finish()),
            decision_hook: None,
        }
    }

    /// Choose whether to allow a request if the backend returns a failure.
    ///
    /// Default is false, the backend error is turned into the response instead.
    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// Only rate limit requests whose path is matched by the classifier, every other request
    /// is forwarded without consulting the backend.
    ///
    /// By default all requests are rate limited.
    pub fn endpoint_classifier(mut self, classifier: EndpointClassifier) -> Self {
        self.classifier = Some(Rc::new(classifier));
        self
    }

    /// Sets the [RateLimiterBuilder::request_allowed_transformation] and
    /// [RateLimiterBuilder::request_denied_response] functions, such that the following headers
    /// are set in both the allowed and denied responses:
    ///
    /// - `x-ratelimit-limit`\
    /// - `x-ratelimit-remaining`\
    /// - `x-ratelimit-reset` (seconds until the oldest request leaves the window)
    /// - `retry-after` (denied only, seconds until a slot is free)
    ///
    /// Call after [RateLimiterBuilder::json_rejection] to put the headers on the JSON rejection.
    pub fn add_headers(mut self) -> Self
    where
        BO: LimitOutput + 'static,
    {
        self.allowed_transformation = Some(Rc::new(
            |map: &mut HeaderMap, output: Option<&BO>| {
                if let Some(status) = output {
                    insert_limit_headers(map, status);
                }
            },
        ));
        let denied_response = self.denied_response.clone();
        self.denied_response = Rc::new(move |status: &BO| {
            let mut response = (denied_response)(status);
            let map = response.headers_mut();
            insert_limit_headers(map, status);
            map.insert(RETRY_AFTER, HeaderValue::from(status.seconds_until_reset()));
            response
        });
        self
    }

    /// Deny with status 429 and a JSON body of the form
    /// `{error, message, limit, window, retry_after, client_key}`.
    pub fn json_rejection(mut self) -> Self
    where
        BO: LimitOutput + 'static,
    {
        self.denied_response = Rc::new(|status: &BO| {
            too_many_requests(
                status.limit(),
                status.window_secs(),
                status.seconds_until_reset(),
                status.client_key(),
            )
        });
        self
    }

    /// Write a request log line for every rate limited request, naming the client key the
    /// request was counted against.
    pub fn audit(mut self, log: AuditLog) -> Self
    where
        BO: LimitOutput + 'static,
    {
        let hook = move |req: &ServiceRequest, decision: Decision, status: &BO| {
            let event = match decision {
                Decision::Allowed => format!(
                    "Admitted - Client: {} - Remaining: {}",
                    status.client_key(),
                    status.remaining()
                ),
                Decision::Denied => format!(
                    "Rate limit exceeded - Client: {} - Limit: {} per {}s - Retry after: {}s",
                    status.client_key(),
                    status.limit(),
                    status.window_secs(),
                    status.seconds_until_reset()
                ),
            };
            log.record(req, Some(&event));
        };
        self.decision_hook = Some(Rc::new(hook));
        self
    }

    /// In the event that the request is allowed:
    ///
    /// You can optionally mutate the response headers to include the rate limit status.
    ///
    /// By default no changes are made to the response.
    ///
    /// Note the [Backend::Output] will be [None] if the backend failed and
    /// [RateLimiterBuilder::fail_open] is enabled.
    pub fn request_allowed_transformation<M>(mut self, mutation: Option<M>) -> Self
    where
        M: Fn(&mut HeaderMap, Option<&BO>) + 'static,
    {
        self.allowed_transformation = mutation.map(|m| Rc::new(m) as Rc<AllowedTransformation<BO>>);
        self
    }

    /// In the event that the request is denied, configure the [HttpResponse] returned.
    ///
    /// Defaults to an empty body with status 429.
    pub fn request_denied_response<R>(mut self, denied_response: R) -> Self
    where
        R: Fn(&BO) -> HttpResponse + 'static,
    {
        self.denied_response = Rc::new(denied_response);
        self
    }

    pub fn build(self) -> RateLimiter<BE, BO, F> {
        RateLimiter {
            backend: self.backend,
            input_fn: Rc::new(self.input_fn),
            fail_open: self.fail_open,
            classifier: self.classifier,
            allowed_transformation: self.allowed_transformation,
            denied_response: self.denied_response,
            decision_hook: self.decision_hook,
        }
    }
}

fn insert_limit_headers<BO: LimitOutput>(map: &mut HeaderMap, status: &BO) {
    map.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(status.limit()));
    map.insert(
        X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(status.remaining()),
    );
    map.insert(
        X_RATELIMIT_RESET.clone(),
        HeaderValue::from(status.seconds_until_reset()),
    );
}

/// A trait that a [Backend::Output] should implement in order to use the
/// [RateLimiterBuilder::add_headers], [RateLimiterBuilder::json_rejection] and
/// [RateLimiterBuilder::audit] functions.
pub trait LimitOutput {
    /// Value for the `x-ratelimit-limit` header.
    fn limit(&self) -> u64;

    /// Value for the `x-ratelimit-remaining` header.
    fn remaining(&self) -> u64;

    /// Value for the `x-ratelimit-reset` and `retry-after` headers.
    ///
    /// This should be the number of seconds from now until a slot frees up.\
    /// If a slot is already free this should return 0.
    fn seconds_until_reset(&self) -> u64;

    /// Length of the rate limiting window in seconds.
    fn window_secs(&self) -> u64;

    /// The key the request was counted against.
    fn client_key(&self) -> &ClientKey;
}
