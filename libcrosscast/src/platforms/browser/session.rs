//! Logged-in browser state

use super::Cookie;

pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserSession {
    pub cookies: Vec<Cookie>,
    pub created_at: i64,
    pub expires_at: i64,
}

impl BrowserSession {
    pub fn new(cookies: Vec<Cookie>, ttl_hours: i64, now: i64) -> Self {
        let ttl_hours = if ttl_hours > 0 {
            ttl_hours
        } else {
            DEFAULT_SESSION_TTL_HOURS
        };
        Self {
            cookies,
            created_at: now,
            expires_at: now + ttl_hours * 3600,
        }
    }

    pub fn is_valid(&self, now: i64) -> bool {
        now < self.expires_at
    }
}
