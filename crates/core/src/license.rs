//! License model and pluggable license string parsers.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{ClientError, ClientResult};

pub const NO_LICENSE_INSTALLED: &str = "no license installed";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OnPremLicense {
    pub id: String,
    pub license_type: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_users: Option<u32>,
    pub max_ingest_gb_per_day: Option<f64>,
}

/// An installed license. "No license" is reported as an error, never as a
/// variant of this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum License {
    OnPrem(OnPremLicense),
}

impl License {
    pub fn id(&self) -> &str {
        match self {
            License::OnPrem(l) => &l.id,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        match self {
            License::OnPrem(l) => l.expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool { self.expires_at() <= now }
}

/// Turns an opaque license string into a typed license.
pub trait LicenseParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<License, String>;
}

/// Parse with `parser`, wrapping failures the way callers expect to see them.
pub fn parse_license(parser: &dyn LicenseParser, raw: &str) -> ClientResult<License> {
    parser.parse(raw.trim()).map_err(|cause| ClientError::Parse(format!("failed to parse license: {}", cause)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Claims {
    uid: String,
    iat: i64,
    exp: i64,
    #[serde(default)]
    license_type: Option<String>,
    #[serde(default)]
    max_users: Option<u32>,
    #[serde(default)]
    max_ingest_gb_per_day: Option<f64>,
}

/// Signed three-segment license token (`header.payload.signature`). The
/// payload is base64url JSON claims. Signatures are verified by the cluster,
/// not here.
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtLicenseParser;

impl LicenseParser for JwtLicenseParser {
    fn parse(&self, raw: &str) -> Result<License, String> {
        let segments: Vec<&str> = raw.split('.').collect();
        let payload = match segments.as_slice() {
            [_, payload, _] if !payload.is_empty() => *payload,
            _ => return Err(format!("expected 3 dot-separated segments, got {}", segments.len())),
        };
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).map_err(|e| format!("payload: {}", e))?;
        let claims: Claims = serde_json::from_slice(&bytes).map_err(|e| format!("claims: {}", e))?;
        if claims.uid.is_empty() {
            return Err("claims: empty uid".into());
        }
        let issued_at = timestamp(claims.iat, "iat")?;
        let expires_at = timestamp(claims.exp, "exp")?;
        if expires_at <= issued_at {
            return Err("license expires before it is issued".into());
        }
        Ok(License::OnPrem(OnPremLicense {
            id: claims.uid,
            license_type: claims.license_type.unwrap_or_else(|| "onprem".to_string()),
            issued_at,
            expires_at,
            max_users: claims.max_users,
            max_ingest_gb_per_day: claims.max_ingest_gb_per_day,
        }))
    }
}

fn timestamp(secs: i64, claim: &str) -> Result<DateTime<Utc>, String> {
    Utc.timestamp_opt(secs, 0).single().ok_or_else(|| format!("claims: {} out of range", claim))
}

/// Encode claims into an unsigned token accepted by [`JwtLicenseParser`].
/// Handy for tests and local clusters.
pub fn encode_unsigned(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.unsigned", header, payload)
}
