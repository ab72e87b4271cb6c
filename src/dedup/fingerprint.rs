//! # Request fingerprinting.
//!
//! A fingerprint is the deterministic identity of a request, used to detect
//! duplicate concurrent submissions: path + query normalized by sorting its
//! pairs + the serialized body. Two requests that differ only in query-pair
//! order produce the same fingerprint.

/// Builds the deterministic fingerprint of a request.
///
/// `query` pairs are sorted by key, then value, so parameter order never
/// affects identity. `body` is the caller's serialized body, if any.
pub fn fingerprint<'a, I>(path: &str, query: I, body: Option<&str>) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut pairs: Vec<(&str, &str)> = query.into_iter().collect();
    pairs.sort_unstable();

    let mut key = String::with_capacity(path.len() + 16);
    key.push_str(path);
    key.push('?');
    for (i, (k, v)) in pairs.iter().enumerate() {
        if i > 0 {
            key.push('&');
        }
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    key.push('|');
    if let Some(body) = body {
        key.push_str(body);
    }
    key
}
