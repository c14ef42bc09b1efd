//! Expiration policy engine
//!
//! Pure decision logic: the protocol handler asks these functions what an
//! upload's expiry should be and whether it has passed. Persistence happens in
//! the handler through the store's expiration fragment.

use chrono::{DateTime, Duration, Utc};

/// How long uploads stay valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpirationPolicy {
    /// Uploads never expire
    #[default]
    None,
    /// Expiry fixed at creation time + duration
    Absolute(Duration),
    /// Expiry recomputed as last successful append + duration
    Sliding(Duration),
}

/// What a successful append does to the upload's expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendExpiry {
    /// Leave the stored value alone and echo it
    Keep(Option<DateTime<Utc>>),
    /// Persist this new value exactly once
    Refresh(DateTime<Utc>),
}

impl AppendExpiry {
    /// The value to put in `Upload-Expires`, if any
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Keep(expires) => *expires,
            Self::Refresh(expires) => Some(*expires),
        }
    }
}

impl ExpirationPolicy {
    pub fn absolute_secs(seconds: i64) -> Self {
        Self::Absolute(Duration::seconds(seconds))
    }

    pub fn sliding_secs(seconds: i64) -> Self {
        Self::Sliding(Duration::seconds(seconds))
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Absolute(timeout) | Self::Sliding(timeout) => Some(*timeout),
        }
    }

    /// Expiry of a newly created non-final upload.
    ///
    /// Both policy kinds start from `now + timeout`.
    pub fn initial_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.timeout().map(|timeout| now + timeout)
    }

    /// Expiry after a successful append given the currently stored value
    pub fn after_append(&self, now: DateTime<Utc>, stored: Option<DateTime<Utc>>) -> AppendExpiry {
        match self {
            Self::None => AppendExpiry::Keep(None),
            Self::Absolute(_) => AppendExpiry::Keep(stored),
            Self::Sliding(timeout) => AppendExpiry::Refresh(now + *timeout),
        }
    }
}

/// An upload whose expiry lies strictly before `now` no longer exists
pub fn is_expired(expires: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(expires, Some(expires) if expires < now)
}
