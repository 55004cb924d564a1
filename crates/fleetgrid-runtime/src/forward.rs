//! Request forwarding helpers.
//!
//! Traffic reaches units over plain connections inside the host, so the
//! only rewrite applied to a forwarded request is downgrading a secure
//! scheme. Method, headers, path, query and body pass through untouched.

use http::uri::{Scheme, Uri};

use crate::UnitRequest;

/// Rewrite an absolute `https`/`wss` request URI to `http`/`ws`.
///
/// Origin-form URIs (no scheme) are returned unchanged.
pub fn normalize_scheme(request: UnitRequest) -> UnitRequest {
    let (mut parts, body) = request.into_parts();
    if let Some(uri) = downgrade(&parts.uri) {
        parts.uri = uri;
    }
    UnitRequest::from_parts(parts, body)
}

fn downgrade(uri: &Uri) -> Option<Uri> {
    let scheme = uri.scheme_str()?;
    let plain = match scheme {
        s if s.eq_ignore_ascii_case("https") => Scheme::HTTP,
        s if s.eq_ignore_ascii_case("wss") => "ws".parse::<Scheme>().ok()?,
        _ => return None,
    };

    let mut parts = uri.clone().into_parts();
    parts.scheme = Some(plain);
    Uri::from_parts(parts).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn request(uri: &str) -> UnitRequest {
        http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("x-trace", "abc")
            .body(Bytes::from_static(b"payload"))
            .unwrap()
    }

    #[test]
    fn https_becomes_http() {
        let req = normalize_scheme(request("https://unit.example/path?q=1"));
        assert_eq!(req.uri().to_string(), "http://unit.example/path?q=1");
    }

    #[test]
    fn wss_becomes_ws() {
        let req = normalize_scheme(request("wss://unit.example/socket"));
        assert_eq!(req.uri().scheme_str(), Some("ws"));
        assert_eq!(req.uri().path(), "/socket");
    }

    #[test]
    fn plain_http_is_untouched() {
        let req = normalize_scheme(request("http://unit.example:8080/"));
        assert_eq!(req.uri().to_string(), "http://unit.example:8080/");
    }

    #[test]
    fn origin_form_is_untouched() {
        let req = normalize_scheme(request("/status?verbose=true"));
        assert_eq!(req.uri().to_string(), "/status?verbose=true");
    }

    #[test]
    fn method_headers_and_body_survive() {
        let req = normalize_scheme(request("https://unit.example/"));
        assert_eq!(req.method(), http::Method::POST);
        assert_eq!(req.headers()["x-trace"], "abc");
        assert_eq!(req.body().as_ref(), b"payload");
    }
}
