/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Request signing for the credential kinds an account may carry.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha1::Sha1;

use crate::account::Credentials;
use crate::error::{ConnResult, ConnectionError, StatusCode};

type HmacSha1 = Hmac<Sha1>;

/// RFC 3986 percent-encoding: everything but `A-Za-z0-9-._~`.
pub fn encode(input: &str) -> String {
    urlencoding::encode(input).into_owned()
}

pub fn new_nonce() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Scheme, host, non-default port and path; query and fragment dropped.
fn base_url(url: &reqwest::Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.port() {
        Some(port) => format!("{}://{host}:{port}{}", url.scheme(), url.path()),
        None => format!("{}://{host}{}", url.scheme(), url.path()),
    }
}

pub fn signature_base_string(method: &str, url: &str, params: &[(String, String)]) -> ConnResult<String> {
    let parsed = reqwest::Url::parse(url).map_err(|_| ConnectionError::malformed_url(url))?;
    let mut encoded: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (encode(&k), encode(&v)))
        .chain(params.iter().map(|(k, v)| (encode(k), encode(v))))
        .collect();
    encoded.sort();
    let joined = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    Ok(format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(&base_url(&parsed)),
        encode(&joined)
    ))
}

pub fn hmac_sha1_signature(base: &str, consumer_secret: &str, token_secret: &str) -> ConnResult<String> {
    let key = format!("{}&{}", encode(consumer_secret), encode(token_secret));
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| ConnectionError::hard(StatusCode::Unauthorized, format!("oauth key: {e}")))?;
    mac.update(base.as_bytes());
    Ok(B64.encode(mac.finalize().into_bytes()))
}

pub struct OAuth1Request<'a> {
    pub method: &'a str,
    pub url: &'a str,
    /// Form parameters of the body; query parameters are read from `url`.
    pub form: &'a [(String, String)],
    pub nonce: &'a str,
    pub timestamp: i64,
}

pub fn oauth1_header(
    req: &OAuth1Request<'_>,
    consumer_key: &str,
    consumer_secret: &str,
    token: &str,
    token_secret: &str,
) -> ConnResult<String> {
    let mut oauth: Vec<(String, String)> = vec![
        ("oauth_consumer_key".into(), consumer_key.into()),
        ("oauth_nonce".into(), req.nonce.into()),
        ("oauth_signature_method".into(), "HMAC-SHA1".into()),
        ("oauth_timestamp".into(), req.timestamp.to_string()),
    ];
    if !token.is_empty() {
        oauth.push(("oauth_token".into(), token.into()));
    }
    oauth.push(("oauth_version".into(), "1.0".into()));

    let mut all = oauth.clone();
    all.extend(req.form.iter().cloned());
    let base = signature_base_string(req.method, req.url, &all)?;
    let signature = hmac_sha1_signature(&base, consumer_secret, token_secret)?;
    oauth.push(("oauth_signature".into(), signature));
    oauth.sort();

    let fields = oauth
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("OAuth {fields}"))
}

/// `Authorization` header value for `credentials`, if any.
pub fn authorization(
    credentials: &Credentials,
    method: &str,
    url: &str,
    form: &[(String, String)],
) -> ConnResult<Option<String>> {
    match credentials {
        Credentials::None => Ok(None),
        Credentials::Basic { username, password } => {
            Ok(Some(format!("Basic {}", B64.encode(format!("{username}:{password}")))))
        }
        Credentials::OAuth1 {
            consumer_key,
            consumer_secret,
            token,
            token_secret,
        } => {
            let nonce = new_nonce();
            let req = OAuth1Request {
                method,
                url,
                form,
                nonce: &nonce,
                timestamp: chrono::Utc::now().timestamp(),
            };
            oauth1_header(&req, consumer_key, consumer_secret, token, token_secret).map(Some)
        }
        Credentials::OAuth2 { access_token } => Ok(Some(format!("Bearer {access_token}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_documented_sample() {
        let form = vec![(
            "status".to_string(),
            "Hello Ladies + Gentlemen, a signed OAuth request!".to_string(),
        )];
        let req = OAuth1Request {
            method: "post",
            url: "https://api.twitter.com/1.1/statuses/update.json?include_entities=true",
            form: &form,
            nonce: "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg",
            timestamp: 1318622958,
        };
        let header = oauth1_header(
            &req,
            "xvz1evFS4wEEPTGEFPHBog",
            "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw",
            "370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb",
            "LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE",
        )
        .unwrap();
        assert!(header.starts_with("OAuth oauth_consumer_key=\"xvz1evFS4wEEPTGEFPHBog\""));
        assert!(header.contains("oauth_signature=\"hCtSmYh%2BiHYCEqBWrE7C7hYmtUk%3D\""));
    }

    #[test]
    fn base_string_merges_query_and_form() {
        let base = signature_base_string(
            "GET",
            "HTTPS://Example.COM:443/a b?z=1&a=2",
            &[("m".to_string(), "x y".to_string())],
        )
        .unwrap();
        assert_eq!(base, "GET&https%3A%2F%2Fexample.com%2Fa%2520b&a%3D2%26m%3Dx%2520y%26z%3D1");
    }

    #[test]
    fn bearer_and_basic() {
        let bearer = authorization(
            &Credentials::OAuth2 {
                access_token: "t0k".into(),
            },
            "GET",
            "https://m.example/api",
            &[],
        )
        .unwrap();
        assert_eq!(bearer.as_deref(), Some("Bearer t0k"));
        let basic = authorization(
            &Credentials::Basic {
                username: "u".into(),
                password: "p".into(),
            },
            "GET",
            "https://m.example/api",
            &[],
        )
        .unwrap();
        assert_eq!(basic.as_deref(), Some("Basic dTpw"));
        assert_eq!(new_nonce().len(), 32);
    }
}
