//! SigV4 presigning for RDS IAM database authentication
//!
//! An RDS auth token is a presigned `GET https://{host}:{port}/?Action=connect&DBUser=...`
//! request for the `rds-db` service, with the scheme stripped. The port is
//! part of the signed `host` header; a token signed without it is rejected by
//! the database even though it looks well formed.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};

use super::IdentityCredentials;
use crate::error::{DbQueryError, Result};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "rds-db";

/// Token lifetime in seconds
pub const TOKEN_EXPIRY_SECS: u32 = 900;

/// SHA-256 of the empty payload
const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// RFC 3986 unreserved characters stay literal, everything else is escaped
const URI_ENCODE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// What a token authorizes: `user` connecting to `host:port` in `region`
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest<'a> {
    pub host: &'a str,
    pub port: u16,
    pub user: &'a str,
    pub region: &'a str,
}

/// Presign an RDS `connect` request at `signed_at`
pub fn presign_connect(
    request: &ConnectRequest<'_>,
    identity: &IdentityCredentials,
    signed_at: DateTime<Utc>,
) -> Result<String> {
    validate(request, identity)?;

    let amz_date = signed_at.format("%Y%m%dT%H%M%SZ").to_string();
    let date = signed_at.format("%Y%m%d").to_string();
    let scope = format!("{date}/{}/{SERVICE}/aws4_request", request.region);
    let host = format!("{}:{}", request.host, request.port);

    let mut params = vec![
        ("Action", "connect".to_string()),
        ("DBUser", request.user.to_string()),
        ("X-Amz-Algorithm", ALGORITHM.to_string()),
        ("X-Amz-Credential", format!("{}/{scope}", identity.access_key_id)),
        ("X-Amz-Date", amz_date.clone()),
        ("X-Amz-Expires", TOKEN_EXPIRY_SECS.to_string()),
    ];
    if let Some(session_token) = &identity.session_token {
        params.push(("X-Amz-Security-Token", session_token.clone()));
    }
    params.push(("X-Amz-SignedHeaders", "host".to_string()));

    let query = canonical_query(&params);

    let canonical_request =
        format!("GET\n/\n{query}\nhost:{host}\n\nhost\n{EMPTY_PAYLOAD_SHA256}");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(&identity.secret_access_key, &date, request.region)?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    Ok(format!("{host}/?{query}&X-Amz-Signature={signature}"))
}

fn validate(request: &ConnectRequest<'_>, identity: &IdentityCredentials) -> Result<()> {
    let missing = if request.host.is_empty() {
        Some("database host")
    } else if request.port == 0 {
        Some("database port")
    } else if request.user.is_empty() {
        Some("database user")
    } else if request.region.is_empty() {
        Some("AWS region")
    } else if identity.access_key_id.is_empty() {
        Some("access key id")
    } else if identity.secret_access_key.is_empty() {
        Some("secret access key")
    } else {
        None
    };

    match missing {
        Some(what) => Err(DbQueryError::credential_unavailable(format!(
            "cannot sign auth token: missing {what}"
        ))),
        None => Ok(()),
    }
}

/// Encode and sort query parameters by key, then value
fn canonical_query(params: &[(&str, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort();

    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn uri_encode(value: &str) -> String {
    utf8_percent_encode(value, URI_ENCODE).to_string()
}

fn signing_key(secret: &str, date: &str, region: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| DbQueryError::credential_unavailable(format!("invalid signing key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
