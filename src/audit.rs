//! Plain text request log lines for admitted and denied requests.

use actix_web::dev::ServiceRequest;
use std::rc::Rc;

const ANONYMOUS: &str = "Anonymous";

/// Receives one line per logged event.
///
/// Recording is fire-and-forget: a sink must deal with its own failures and never panic, as it
/// runs inline in the request path.
pub trait RequestLogSink {
    fn record(&self, line: &str);
}

impl<F> RequestLogSink for F
where
    F: Fn(&str),
{
    fn record(&self, line: &str) {
        self(line)
    }
}

/// Forwards lines to the [log] facade at info level, under the `request_log` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl RequestLogSink for LogSink {
    fn record(&self, line: &str) {
        log::info!(target: "request_log", "{line}");
    }
}

type IdentityLookup = dyn Fn(&ServiceRequest) -> Option<String>;

/// Writes request log lines to a sink, labelling each with the requesting user.
///
/// The identity is best-effort and only ever used for the log line, never for admission.
#[derive(Clone)]
pub struct AuditLog {
    sink: Rc<dyn RequestLogSink>,
    identity: Rc<IdentityLookup>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(LogSink)
    }
}

impl AuditLog {
    pub fn new<S>(sink: S) -> Self
    where
        S: RequestLogSink + 'static,
    {
        Self {
            sink: Rc::new(sink),
            identity: Rc::new(|_| None),
        }
    }

    /// Look up the authenticated user of a request, [None] labels the request as anonymous.
    pub fn identity<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&ServiceRequest) -> Option<String> + 'static,
    {
        self.identity = Rc::new(lookup);
        self
    }

    pub fn user(&self, req: &ServiceRequest) -> String {
        (self.identity)(req).unwrap_or_else(|| ANONYMOUS.to_owned())
    }

    /// Format a line: `{timestamp} - User: {user} - Path: {path}`, followed by ` - {event}` when
    /// an event is given.
    pub fn line(&self, req: &ServiceRequest, event: Option<&str>) -> String {
        let mut line = format!(
            "{} - User: {} - Path: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f"),
            self.user(req),
            req.path()
        );
        if let Some(event) = event {
            line.push_str(" - ");
            line.push_str(event);
        }
        line
    }

    pub fn record(&self, req: &ServiceRequest, event: Option<&str>) {
        self.sink.record(&self.line(req, event));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use std::cell::RefCell;

    /// A sink collecting lines, for assertions.
    pub(crate) fn collecting_sink() -> (AuditLog, Rc<RefCell<Vec<String>>>) {
        let lines = Rc::new(RefCell::new(Vec::new()));
        let captured = lines.clone();
        let log = AuditLog::new(move |line: &str| captured.borrow_mut().push(line.to_owned()));
        (log, lines)
    }

    #[test]
    fn test_anonymous_by_default() {
        let (log, lines) = collecting_sink();
        let req = TestRequest::with_uri("/api/messages/").to_srv_request();
        log.record(&req, None);
        let lines = lines.borrow();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(" - User: Anonymous - Path: /api/messages/"));
    }

    #[test]
    fn test_identity_and_event() {
        let (log, lines) = collecting_sink();
        let log = log.identity(|req| {
            req.headers()
                .get("x-user")
                .and_then(|v| v.to_str().ok())
                .map(ToOwned::to_owned)
        });
        let req = TestRequest::with_uri("/api/messages/")
            .insert_header(("x-user", "alice"))
            .to_srv_request();
        log.record(&req, Some("Rate limit exceeded"));
        assert!(lines.borrow()[0]
            .ends_with(" - User: alice - Path: /api/messages/ - Rate limit exceeded"));
    }
}
