//! Client identity derivation and counter keys.
//!
//! A client is identified by its network address, as seen through any
//! forwarding proxy. This is not a per-human identity: clients behind the
//! same NAT or proxy share one quota, and so do all clients whose address
//! cannot be determined (they fall back to [`ClientIdentity::UNKNOWN`]).

use crate::domain::window::Scope;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// Identity of the client a quota is charged to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientIdentity(Arc<str>);

impl ClientIdentity {
    /// Sentinel identity shared by every client whose address is unknown.
    pub const UNKNOWN: &'static str = "unknown";

    /// Create an identity from an already-derived string.
    ///
    /// Blank input is replaced by the [`UNKNOWN`](Self::UNKNOWN) sentinel.
    pub fn new(value: impl AsRef<str>) -> Self {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            tracing::debug!("blank client identity, substituting the unknown sentinel");
            return Self::unknown();
        }
        ClientIdentity(Arc::from(trimmed))
    }

    /// The shared sentinel identity.
    pub fn unknown() -> Self {
        ClientIdentity(Arc::from(Self::UNKNOWN))
    }

    /// Derive an identity from request transport metadata.
    ///
    /// Precedence: the first entry of the forwarded-address header
    /// (`X-Forwarded-For` style, comma separated), then the direct peer
    /// address, then the unknown sentinel.
    ///
    /// # Example
    /// ```
    /// use designosaur_quota::ClientIdentity;
    /// use std::net::{IpAddr, Ipv4Addr};
    ///
    /// let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
    /// let id = ClientIdentity::derive(Some("203.0.113.9, 10.0.0.1"), Some(peer));
    /// assert_eq!(id.as_str(), "203.0.113.9");
    ///
    /// let id = ClientIdentity::derive(None, Some(peer));
    /// assert_eq!(id.as_str(), "10.0.0.7");
    ///
    /// assert!(ClientIdentity::derive(None, None).is_unknown());
    /// ```
    pub fn derive(forwarded_for: Option<&str>, peer: Option<IpAddr>) -> Self {
        let forwarded = forwarded_for
            .and_then(|header| header.split(',').next())
            .map(str::trim)
            .filter(|first| !first.is_empty());

        if let Some(first) = forwarded {
            return ClientIdentity(Arc::from(first));
        }

        match peer {
            Some(addr) => ClientIdentity(Arc::from(addr.to_string())),
            None => {
                tracing::debug!("no forwarded or peer address, substituting the unknown sentinel");
                Self::unknown()
            }
        }
    }

    /// Whether this is the shared unknown sentinel.
    pub fn is_unknown(&self) -> bool {
        &*self.0 == Self::UNKNOWN
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a single quota counter: one client, one policy, one window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    identity: ClientIdentity,
    policy: Arc<str>,
    scope: Scope,
}

impl ScopeKey {
    /// Build the key for `identity` under `policy`'s `scope` window.
    pub fn new(identity: ClientIdentity, policy: Arc<str>, scope: Scope) -> Self {
        Self {
            identity,
            policy,
            scope,
        }
    }

    /// The client this counter belongs to.
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// The policy name.
    pub fn policy(&self) -> &str {
        &self.policy
    }

    /// The window scope.
    pub fn scope(&self) -> Scope {
        self.scope
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.identity, self.policy, self.scope)
    }
}
