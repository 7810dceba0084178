use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Long-lived session identifier cookie.
pub const PRIMARY_COOKIE: &str = "__Secure-1PSID";
/// Short-lived cookie kept fresh by the rotation endpoint.
pub const ROTATOR_COOKIE: &str = "__Secure-1PSIDTS";

/// Cookie set a browser would carry for the service.
///
/// Serialized as `{"primary": .., "rotator": .., "extras": {..}}`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieBundle {
    #[serde(default)]
    pub primary: String,
    #[serde(default)]
    pub rotator: String,
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl fmt::Debug for CookieBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieBundle")
            .field("primary", &redacted(&self.primary))
            .field("rotator", &redacted(&self.rotator))
            .field("extras", &self.extras.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

impl CookieBundle {
    pub fn new(primary: impl Into<String>, rotator: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            rotator: rotator.into(),
            extras: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_extra(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(&name.into(), value.into());
        self
    }

    pub fn has_primary(&self) -> bool {
        !self.primary.trim().is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            PRIMARY_COOKIE => Some(self.primary.as_str()).filter(|value| !value.is_empty()),
            ROTATOR_COOKIE => Some(self.rotator.as_str()).filter(|value| !value.is_empty()),
            other => self.extras.get(other).map(String::as_str),
        }
    }

    /// Store a cookie in the slot its name maps to.
    pub fn set(&mut self, name: &str, value: String) {
        match name {
            PRIMARY_COOKIE => self.primary = value,
            ROTATOR_COOKIE => self.rotator = value,
            other => {
                self.extras.insert(other.to_owned(), value);
            }
        }
    }

    /// `Cookie` header value: primary, rotator, then extras in name order.
    pub fn header_value(&self) -> String {
        let mut pairs = Vec::with_capacity(self.extras.len() + 2);
        if !self.primary.is_empty() {
            pairs.push(format!("{PRIMARY_COOKIE}={}", self.primary));
        }
        if !self.rotator.is_empty() {
            pairs.push(format!("{ROTATOR_COOKIE}={}", self.rotator));
        }
        for (name, value) in &self.extras {
            pairs.push(format!("{name}={value}"));
        }
        pairs.join("; ")
    }

    /// Fold `Set-Cookie` lines into the bundle; returns how many cookies changed.
    ///
    /// Deletions (`Max-Age=0` or an empty value) drop extras but never clear
    /// the primary or rotator slots.
    pub fn absorb_set_cookies<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) -> usize {
        let mut changed = 0;
        for line in lines {
            let Some(cookie) = parse_set_cookie(line) else {
                continue;
            };
            if cookie.deleted {
                if self.extras.remove(&cookie.name).is_some() {
                    changed += 1;
                }
                continue;
            }
            if self.get(&cookie.name) != Some(cookie.value.as_str()) {
                self.set(&cookie.name, cookie.value);
                changed += 1;
            }
        }
        changed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub deleted: bool,
}

/// Parse the `name=value` head and deletion attributes of one `Set-Cookie` line.
pub fn parse_set_cookie(line: &str) -> Option<SetCookie> {
    let mut parts = line.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"').to_owned();
    let expired = parts.any(|attribute| {
        attribute
            .split_once('=')
            .is_some_and(|(key, val)| key.trim().eq_ignore_ascii_case("max-age") && val.trim() == "0")
    });
    Some(SetCookie {
        name: name.to_owned(),
        deleted: expired || value.is_empty(),
        value,
    })
}

/// Collect every `Set-Cookie` header value from a response header map.
pub fn set_cookie_lines(headers: &reqwest::header::HeaderMap) -> Vec<String> {
    headers
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_never_contains_secrets() {
        let bundle = CookieBundle::new("secret-primary", "secret-rotator").with_extra("NID", "x");
        let rendered = format!("{bundle:?}");
        assert!(!rendered.contains("secret-primary"));
        assert!(!rendered.contains("secret-rotator"));
        assert!(rendered.contains("NID"));
    }

    #[test]
    fn parse_set_cookie_detects_max_age_zero() {
        let cookie = parse_set_cookie("NID=abc; Max-Age=0; Path=/").expect("cookie");
        assert!(cookie.deleted);
    }
}
