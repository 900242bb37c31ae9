//! Header-level transport of trace context and forwarded headers.

use thiserror::Error;
use uuid::Uuid;

use crate::context::TraceContext;

/// Header carrying the trace identifier.
pub const TRACE_ID_HEADER: &str = "x-mesh-trace-id";
/// Header carrying the span identifier of the calling hop.
pub const SPAN_ID_HEADER: &str = "x-mesh-span-id";
/// Header carrying the parent span identifier, absent on roots.
pub const PARENT_SPAN_ID_HEADER: &str = "x-mesh-parent-span-id";

/// Errors raised while decoding transported trace headers.
#[derive(Debug, Error)]
pub enum TraceError {
    /// A trace header was present but did not parse as a UUID.
    #[error("malformed trace header `{name}`: {value}")]
    MalformedHeader {
        /// Offending header name.
        name: &'static str,
        /// Offending header value.
        value: String,
    },
}

impl TraceContext {
    /// Renders the trace headers for an outbound call.
    #[must_use]
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (TRACE_ID_HEADER, self.trace_id().to_string()),
            (SPAN_ID_HEADER, self.span_id().to_string()),
        ];
        if let Some(parent) = self.parent_span_id() {
            headers.push((PARENT_SPAN_ID_HEADER, parent.to_string()));
        }
        headers
    }

    /// Reconstructs a context from inbound headers.
    ///
    /// Returns `Ok(None)` when no trace headers are present (the call is an
    /// entry point and deserves a fresh root).
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::MalformedHeader`] when a present header fails
    /// to parse.
    pub fn from_headers<'a, I>(headers: I) -> Result<Option<Self>, TraceError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut trace_id = None;
        let mut span_id = None;
        let mut parent = None;

        for (name, value) in headers {
            if name.eq_ignore_ascii_case(TRACE_ID_HEADER) {
                trace_id = Some(parse_uuid(TRACE_ID_HEADER, value)?);
            } else if name.eq_ignore_ascii_case(SPAN_ID_HEADER) {
                span_id = Some(parse_uuid(SPAN_ID_HEADER, value)?);
            } else if name.eq_ignore_ascii_case(PARENT_SPAN_ID_HEADER) {
                parent = Some(parse_uuid(PARENT_SPAN_ID_HEADER, value)?);
            }
        }

        match (trace_id, span_id) {
            (Some(trace_id), Some(span_id)) => {
                Ok(Some(Self::from_parts(trace_id, span_id, parent)))
            }
            _ => Ok(None),
        }
    }
}

fn parse_uuid(name: &'static str, value: &str) -> Result<Uuid, TraceError> {
    Uuid::parse_str(value).map_err(|_| TraceError::MalformedHeader {
        name,
        value: value.to_owned(),
    })
}

/// Case-insensitive prefix allowlist selecting which inbound headers are
/// forwarded verbatim on outbound calls.
///
/// Trace headers are carried unconditionally and do not consult the
/// allowlist.
#[derive(Clone, Debug, Default)]
pub struct HeaderAllowlist {
    prefixes: Vec<String>,
}

impl HeaderAllowlist {
    /// Creates an allowlist from the supplied prefixes. Empty prefixes are
    /// dropped; matching is case-insensitive.
    #[must_use]
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes = prefixes
            .into_iter()
            .map(|p| p.into().to_ascii_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { prefixes }
    }

    /// Returns `true` when the header name matches one of the prefixes.
    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        let lowered = name.to_ascii_lowercase();
        self.prefixes.iter().any(|p| lowered.starts_with(p))
    }

    /// Captures the allow-listed subset of inbound headers for forwarding.
    #[must_use]
    pub fn capture<'a, I>(&self, headers: I) -> ForwardedHeaders
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let entries = headers
            .into_iter()
            .filter(|(name, _)| self.allows(name))
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .collect();
        ForwardedHeaders { entries }
    }
}

/// Allow-listed headers captured from an inbound call, replayed on every
/// outbound hop.
#[derive(Clone, Debug, Default)]
pub struct ForwardedHeaders {
    entries: Vec<(String, String)>,
}

impl ForwardedHeaders {
    /// Creates an empty set.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Iterates the captured `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Returns `true` when nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_round_trip() {
        let hop = TraceContext::new_root().child();
        let rendered = hop.to_headers();
        let borrowed: Vec<(&str, &str)> = rendered
            .iter()
            .map(|(name, value)| (*name, value.as_str()))
            .collect();
        let decoded = TraceContext::from_headers(borrowed)
            .expect("decode")
            .expect("present");
        assert_eq!(decoded, hop);
    }

    #[test]
    fn missing_headers_mean_entry_point() {
        let decoded =
            TraceContext::from_headers([("content-type", "application/json")]).expect("decode");
        assert!(decoded.is_none());
    }

    #[test]
    fn malformed_header_is_an_error() {
        let result = TraceContext::from_headers([
            (TRACE_ID_HEADER, "nope"),
            (SPAN_ID_HEADER, "also-nope"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn allowlist_prefix_match_is_case_insensitive() {
        let allowlist = HeaderAllowlist::new(["x-tenant-", "authorization"]);
        assert!(allowlist.allows("X-Tenant-Id"));
        assert!(allowlist.allows("AUTHORIZATION"));
        assert!(!allowlist.allows("x-other"));
    }

    #[test]
    fn capture_keeps_values_verbatim() {
        let allowlist = HeaderAllowlist::new(["x-tenant-"]);
        let captured = allowlist.capture([
            ("X-Tenant-Id", "acme"),
            ("content-length", "12"),
        ]);
        let entries: Vec<_> = captured.iter().collect();
        assert_eq!(entries, vec![("X-Tenant-Id", "acme")]);
    }
}
