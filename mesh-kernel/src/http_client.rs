//! Shared hyper plumbing for registry and inter-agent HTTP traffic.

use std::sync::Arc;
use std::time::Duration;

use hyper::body::to_bytes;
use hyper::client::HttpConnector;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Client, Request, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use tokio::time::timeout;
use webpki_roots::TLS_SERVER_ROOTS;

pub(crate) type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Builds a client that speaks both plain HTTP (in-cluster meshes) and
/// HTTPS with the webpki root store.
pub(crate) fn build_client() -> HyperClient {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let mut http = HttpConnector::new();
    http.enforce_http(false);

    Client::builder().build::<_, Body>(HttpsConnector::from((http, Arc::new(config))))
}

/// Transport-level failure while exchanging a request.
#[derive(Debug)]
pub(crate) enum SendError {
    /// The deadline elapsed before a response arrived.
    TimedOut,
    /// Building or exchanging the request failed.
    Failed(String),
}

/// POSTs a JSON body and returns the response status with its raw bytes.
///
/// Status interpretation is left to the caller; only timeouts and transport
/// failures surface as errors here.
pub(crate) async fn post_json(
    client: &HyperClient,
    uri: Uri,
    headers: &[(&str, String)],
    body: Vec<u8>,
    deadline: Duration,
) -> Result<(StatusCode, Vec<u8>), SendError> {
    let mut builder = Request::post(uri).header(CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, value);
    }
    let request = builder
        .body(Body::from(body))
        .map_err(|err| SendError::Failed(format!("failed to build request: {err}")))?;

    let response = timeout(deadline, client.request(request))
        .await
        .map_err(|_| SendError::TimedOut)?
        .map_err(|err| SendError::Failed(format!("request failed: {err}")))?;

    let status = response.status();
    let bytes = to_bytes(response.into_body())
        .await
        .map_err(|err| SendError::Failed(format!("failed to read response: {err}")))?;

    Ok((status, bytes.to_vec()))
}

/// Normalizes a base URL so paths can be appended without double slashes.
///
/// # Errors
///
/// Returns the offending text when the URL does not parse or carries no
/// scheme or host.
pub(crate) fn sanitize_base_url(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let uri: Uri = trimmed
        .parse()
        .map_err(|_| format!("invalid base URL `{raw}`"))?;
    if uri.scheme().is_none() || uri.host().is_none() {
        return Err(format!("base URL `{raw}` must include scheme and host"));
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(
            sanitize_base_url("http://registry.local:7000/").unwrap(),
            "http://registry.local:7000"
        );
        assert_eq!(
            sanitize_base_url(" https://mesh.example.com "),
            Ok("https://mesh.example.com".to_owned())
        );
    }

    #[test]
    fn relative_or_garbage_urls_rejected() {
        assert!(sanitize_base_url("registry.local").is_err());
        assert!(sanitize_base_url("http://").is_err());
        assert!(sanitize_base_url("not a url").is_err());
    }
}
