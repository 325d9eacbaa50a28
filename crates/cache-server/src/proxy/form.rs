//! Form value extraction for the cache-aside route.
//!
//! Mirrors common form semantics: an urlencoded request body is consulted
//! before the query string and the first occurrence of a name wins. A
//! missing value reads as empty. Pairs with malformed percent-escapes or a
//! `;` are skipped. Values are returned as raw decoded bytes so the cache
//! key covers exactly what the client sent.

use hyper::header::CONTENT_TYPE;
use hyper::http::request::Parts;
use hyper::Method;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Value of form field `name` for a request with an already-buffered body.
pub fn form_value(parts: &Parts, body: &[u8], name: &str) -> Vec<u8> {
    if has_form_body(parts) {
        if let Some(value) = lookup(body, name) {
            return value;
        }
    }

    parts
        .uri
        .query()
        .and_then(|query| lookup(query.as_bytes(), name))
        .unwrap_or_default()
}

fn has_form_body(parts: &Parts) -> bool {
    if !matches!(parts.method, Method::POST | Method::PUT | Method::PATCH) {
        return false;
    }

    parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case(FORM_URLENCODED))
        .unwrap_or(false)
}

/// First value for `name` in an `application/x-www-form-urlencoded` string.
pub fn lookup(encoded: &[u8], name: &str) -> Option<Vec<u8>> {
    encoded
        .split(|b| *b == b'&')
        .filter(|pair| !pair.is_empty() && !pair.contains(&b';'))
        .filter_map(|pair| {
            let (key, value) = match pair.iter().position(|b| *b == b'=') {
                Some(eq) => (&pair[..eq], &pair[eq + 1..]),
                None => (pair, &[][..]),
            };
            Some((decode_component(key)?, decode_component(value)?))
        })
        .find(|(key, _)| key == name.as_bytes())
        .map(|(_, value)| value)
}

/// `None` when the component carries a malformed escape.
fn decode_component(raw: &[u8]) -> Option<Vec<u8>> {
    if !has_valid_escapes(raw) {
        return None;
    }
    let spaced: Vec<u8> = raw
        .iter()
        .map(|b| if *b == b'+' { b' ' } else { *b })
        .collect();
    Some(urlencoding::decode_binary(&spaced).into_owned())
}

/// Every `%` must be followed by two hex digits.
fn has_valid_escapes(raw: &[u8]) -> bool {
    raw.iter()
        .enumerate()
        .filter(|(_, b)| **b == b'%')
        .all(|(i, _)| {
            matches!(
                raw.get(i + 1..i + 3),
                Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit()
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_key::CacheKey;
    use hyper::Request;

    fn parts(method: Method, uri: &str, content_type: Option<&str>) -> Parts {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(ct) = content_type {
            builder = builder.header(CONTENT_TYPE, ct);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_query_value() {
        let p = parts(Method::GET, "/calc?input=hello", None);
        assert_eq!(form_value(&p, b"", "input"), b"hello");
    }

    #[test]
    fn test_missing_value_is_empty() {
        let p = parts(Method::GET, "/calc?other=1", None);
        assert_eq!(form_value(&p, b"", "input"), b"");

        let p = parts(Method::GET, "/calc", None);
        assert_eq!(form_value(&p, b"", "input"), b"");
    }

    #[test]
    fn test_percent_and_plus_decoding() {
        let p = parts(Method::GET, "/calc?input=a+b%20c%26d%3D", None);
        assert_eq!(form_value(&p, b"", "input"), b"a b c&d=");
    }

    #[test]
    fn test_first_value_wins() {
        let p = parts(Method::GET, "/calc?input=first&input=second", None);
        assert_eq!(form_value(&p, b"", "input"), b"first");
    }

    #[test]
    fn test_key_without_value() {
        let p = parts(Method::GET, "/calc?input&x=1", None);
        assert_eq!(form_value(&p, b"", "input"), b"");
    }

    #[test]
    fn test_form_body_takes_precedence_over_query() {
        let p = parts(
            Method::POST,
            "/calc?input=from-query",
            Some("application/x-www-form-urlencoded; charset=utf-8"),
        );
        assert_eq!(form_value(&p, b"input=from-body", "input"), b"from-body");
    }

    #[test]
    fn test_form_body_without_field_falls_back_to_query() {
        let p = parts(
            Method::POST,
            "/calc?input=from-query",
            Some("application/x-www-form-urlencoded"),
        );
        assert_eq!(form_value(&p, b"other=1", "input"), b"from-query");
    }

    #[test]
    fn test_non_form_body_is_ignored() {
        let p = parts(Method::POST, "/calc?input=q", Some("application/json"));
        assert_eq!(form_value(&p, br#"{"input":"json"}"#, "input"), b"q");
    }

    #[test]
    fn test_get_body_is_ignored() {
        let p = parts(
            Method::GET,
            "/calc",
            Some("application/x-www-form-urlencoded"),
        );
        assert_eq!(form_value(&p, b"input=body", "input"), b"");
    }

    #[test]
    fn test_non_utf8_bytes_are_kept_raw() {
        assert_eq!(lookup(b"input=%FF", "input").unwrap(), vec![0xFF]);
        assert_eq!(lookup(b"input=%FE", "input").unwrap(), vec![0xFE]);
        assert_ne!(
            CacheKey::from_input(&lookup(b"input=%FF", "input").unwrap()),
            CacheKey::from_input(&lookup(b"input=%FE", "input").unwrap())
        );
    }

    #[test]
    fn test_malformed_escape_pair_is_skipped() {
        assert_eq!(lookup(b"input=%zz&input=ok", "input").unwrap(), b"ok");
        assert_eq!(lookup(b"input=%4&input=ok", "input").unwrap(), b"ok");
        assert_eq!(lookup(b"input=50%", "input"), None);
        assert_eq!(lookup(b"in%zzput=x&input=y", "input").unwrap(), b"y");
    }

    #[test]
    fn test_pair_with_semicolon_is_skipped() {
        assert_eq!(lookup(b"input=a;b&input=c", "input").unwrap(), b"c");
    }
}
