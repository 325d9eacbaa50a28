//! Static header names and values for cache-server response headers.
//!
//! Avoids runtime `.parse().unwrap()` on the request path.

use hyper::header::{HeaderName, HeaderValue};
use hyper::Response;

/// Reports how a cache-aside response was produced.
pub static X_CACHE: HeaderName = HeaderName::from_static("x-cache");

pub static VALUE_HIT: HeaderValue = HeaderValue::from_static("HIT");
pub static VALUE_MISS: HeaderValue = HeaderValue::from_static("MISS");
pub static VALUE_SHARED: HeaderValue = HeaderValue::from_static("SHARED");

/// Extension trait for inserting static headers into responses.
pub trait CacheHeadersExt {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue);
}

impl<B> CacheHeadersExt for Response<B> {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.headers_mut().insert(name.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_header_replaces_existing_value() {
        let mut response = Response::new(());
        response.set_header(&X_CACHE, &VALUE_MISS);
        response.set_header(&X_CACHE, &VALUE_HIT);
        let values: Vec<_> = response.headers().get_all("x-cache").iter().collect();
        assert_eq!(values, vec![&VALUE_HIT]);
    }
}
