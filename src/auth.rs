//! Identity: who is calling and in which role.
//!
//! The marketplace never authenticates on its own; it trusts the [`CurrentUser`] this
//! layer attaches to each request. With `API_KEYS` configured, `Authorization: Bearer <key>`
//! or `X-API-Key: <key>` selects a configured identity (format:
//! `key:role:user_id[:name],...`, roles `admin` or `vendor`). With auth disabled the
//! identity is taken from `X-User-Id`, `X-User-Role`, and `X-User-Name` headers set by an
//! upstream identity provider.

use crate::types::{UserId, VendorId};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Vendor,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("admin") {
            Some(Role::Admin)
        } else if s.eq_ignore_ascii_case("vendor") {
            Some(Role::Vendor)
        } else {
            None
        }
    }
}

/// Authenticated caller. A vendor's user id is its vendor id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn admin(id: u64, name: impl Into<String>) -> Self {
        Self {
            id: UserId(id),
            name: name.into(),
            role: Role::Admin,
        }
    }

    pub fn vendor(id: VendorId, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: Role::Vendor,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// The vendor this user acts for, if a vendor.
    pub fn vendor_id(&self) -> Option<VendorId> {
        match self.role {
            Role::Vendor => Some(VendorId(self.id.0)),
            Role::Admin => None,
        }
    }
}

/// Auth configuration: disable flag and key → identity map. Built from env.
#[derive(Clone)]
pub struct AuthConfig {
    pub disable: bool,
    keys: Arc<HashMap<String, CurrentUser>>,
}

fn parse_keys(s: &str) -> HashMap<String, CurrentUser> {
    s.split(',')
        .filter_map(|part| {
            let mut split = part.trim().splitn(4, ':');
            let key = split.next()?.trim().to_string();
            let role = Role::parse(split.next()?.trim())?;
            let id: u64 = split.next()?.trim().parse().ok()?;
            let name = split.next().map(|n| n.trim().to_string()).unwrap_or_default();
            if key.is_empty() {
                return None;
            }
            Some((
                key,
                CurrentUser {
                    id: UserId(id),
                    name,
                    role,
                },
            ))
        })
        .collect()
}

impl AuthConfig {
    /// Auth disabled: identity comes from trusted `X-User-*` headers.
    pub fn disabled() -> Self {
        Self {
            disable: true,
            keys: Arc::new(HashMap::new()),
        }
    }

    /// Build from a key list (e.g. "k1:admin:1:Ops,k2:vendor:7:Acme"). For tests.
    pub fn from_keys(keys: &str) -> Self {
        let map = parse_keys(keys);
        Self {
            disable: map.is_empty(),
            keys: Arc::new(map),
        }
    }

    /// Load from env: `DISABLE_AUTH=true` or unset `API_KEYS` => auth disabled.
    pub fn from_env() -> Self {
        let disable = std::env::var("DISABLE_AUTH")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let keys = std::env::var("API_KEYS")
            .map(|s| parse_keys(&s))
            .unwrap_or_default();
        Self {
            disable: disable || keys.is_empty(),
            keys: Arc::new(keys),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<CurrentUser> {
        self.keys.get(key).cloned()
    }
}

/// Returns the API key from `Authorization: Bearer <key>` or `X-API-Key: <key>`.
fn api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(s) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let s = s.trim();
        if s.get(..7).map(|p| p.eq_ignore_ascii_case("bearer ")).unwrap_or(false) {
            return Some(s.get(7..).unwrap_or("").trim().to_string());
        }
    }
    headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

/// Identity asserted by an upstream provider through `X-User-*` headers.
fn header_identity(headers: &HeaderMap) -> Option<CurrentUser> {
    let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
    let id: u64 = text("X-User-Id")?.parse().ok()?;
    let role = Role::parse(text("X-User-Role")?)?;
    let name = text("X-User-Name").unwrap_or_default().to_string();
    Some(CurrentUser {
        id: UserId(id),
        name,
        role,
    })
}

/// Auth middleware: resolves the caller and injects [`CurrentUser`], or returns 401.
pub async fn authenticate(State(config): State<AuthConfig>, mut req: Request, next: Next) -> Response {
    let user = if config.disable {
        header_identity(req.headers())
    } else {
        match api_key(req.headers()) {
            Some(k) if !k.is_empty() => match config.lookup(&k) {
                Some(user) => Some(user),
                None => return (StatusCode::UNAUTHORIZED, "invalid API key").into_response(),
            },
            _ => None,
        }
    };
    match user {
        Some(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        None => (StatusCode::UNAUTHORIZED, "missing or invalid caller identity").into_response(),
    }
}
