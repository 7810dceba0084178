use gemini_api::CookieBundle;
use serde::{Deserialize, Serialize};

pub const RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CookieRecordType {
    Cookies,
}

/// On-disk wrapper around one account's cookie bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CookieRecord {
    #[serde(rename = "type")]
    pub record_type: CookieRecordType,
    pub version: u32,
    pub account: String,
    pub saved_at: String,
    pub cookies: CookieBundle,
}

impl CookieRecord {
    #[must_use]
    pub fn v1(account: impl Into<String>, saved_at: impl Into<String>, cookies: CookieBundle) -> Self {
        Self {
            record_type: CookieRecordType::Cookies,
            version: RECORD_VERSION,
            account: account.into(),
            saved_at: saved_at.into(),
            cookies,
        }
    }
}
