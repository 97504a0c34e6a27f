//! AWS Signature Version 4 (spec §4.3). Hand-rolled rather than pulled from
//! a bundled SDK client so the canonical-request construction stays a pure,
//! unit-testable function independent of any particular HTTP client.

use crate::percent::{canonical_query_string, sigv4_encode};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

pub struct SigningInput<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub query: &'a [(String, String)],
    pub headers: &'a mut BTreeMap<String, String>,
    pub body: Option<&'a [u8]>,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub region: &'a str,
    pub service: &'a str,
    pub sign_payload: bool,
    pub now: chrono::DateTime<chrono::Utc>,
}

/// Mutates `input.headers` in place to add `host`, `x-amz-date`,
/// `x-amz-content-sha256`, and `authorization`.
pub fn sign(input: &mut SigningInput) {
    let amz_date = input.now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = input.now.format("%Y%m%d").to_string();

    let payload_hash = if input.sign_payload {
        hex_sha256(input.body.unwrap_or(&[]))
    } else {
        "UNSIGNED-PAYLOAD".to_string()
    };

    input.headers.insert("host".to_string(), input.host.to_string());
    input.headers.insert("x-amz-date".to_string(), amz_date.clone());
    input.headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());

    let encoded_path = encode_path(input.path);
    let canonical_query = canonical_query_string(input.query);

    let mut sorted_headers: BTreeMap<String, String> = BTreeMap::new();
    for (k, v) in input.headers.iter() {
        sorted_headers.insert(k.to_ascii_lowercase(), v.trim().to_string());
    }
    let canonical_headers: String = sorted_headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect();
    let signed_headers = sorted_headers.keys().cloned().collect::<Vec<_>>().join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        input.method.to_ascii_uppercase(),
        encoded_path,
        canonical_query,
        canonical_headers,
        signed_headers,
        payload_hash
    );

    let credential_scope = format!("{date_stamp}/{}/{}/aws4_request", input.region, input.service);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(input.secret_key, &date_stamp, input.region, input.service);
    let signature = hex_hmac(&signing_key, string_to_sign.as_bytes());

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        input.access_key
    );
    input.headers.insert("authorization".to_string(), authorization);
}

fn encode_path(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    let encoded = trimmed
        .split('/')
        .map(|segment| sigv4_encode(segment, true))
        .collect::<Vec<_>>()
        .join("/");
    format!("/{encoded}")
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_bytes(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_bytes(key, data))
}

fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_bytes(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_bytes(&k_date, region.as_bytes());
    let k_service = hmac_bytes(&k_region, service.as_bytes());
    hmac_bytes(&k_service, b"aws4_request")
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}
