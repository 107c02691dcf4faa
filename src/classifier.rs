/// Decides which request paths are subject to rate limiting.
#[derive(Debug, Clone, Default)]
pub struct EndpointClassifier {
    prefixes: Vec<String>,
}

impl EndpointClassifier {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Whether the path starts with one of the protected prefixes.
    pub fn is_rate_limited_endpoint(&self, path: &str) -> bool {
        self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_match() {
        let classifier = EndpointClassifier::new(["/api/messages", "/api/conversations/"]);
        assert!(classifier.is_rate_limited_endpoint("/api/messages"));
        assert!(classifier.is_rate_limited_endpoint("/api/messages/12/"));
        assert!(classifier.is_rate_limited_endpoint("/api/conversations/3/messages"));
        assert!(!classifier.is_rate_limited_endpoint("/api/conversations"));
        assert!(!classifier.is_rate_limited_endpoint("/admin/api/messages"));
        assert!(!classifier.is_rate_limited_endpoint("/"));
    }

    #[test]
    fn test_empty_matches_nothing() {
        assert!(!EndpointClassifier::default().is_rate_limited_endpoint("/api/messages"));
    }
}
