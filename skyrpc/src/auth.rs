/*
 * Created on Tue Mar 19 2024
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2024, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! Capability based access control for RPC methods. A connection carries the
//! capability set its peer authenticated for (populated by the embedder; plain
//! TCP connections default to the full set). A method may install an access
//! filter which runs before its handler; a filter that returns false fails the
//! request with PERMISSION_DENIED before any handler code runs.

use {crate::request::RpcRequest, core::fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
/// One grantable capability of the platform
pub enum Capability {
    /// read documents and values
    ContentRead = 0,
    /// write documents and values
    ContentWrite = 1,
    /// run search queries
    Search = 2,
    /// read cluster state and health
    ClusterState = 3,
    /// read metrics endpoints
    MetricsRead = 4,
    /// administrative operations
    Admin = 5,
}

impl Capability {
    const ALL: [Capability; 6] = [
        Self::ContentRead,
        Self::ContentWrite,
        Self::Search,
        Self::ClusterState,
        Self::MetricsRead,
        Self::Admin,
    ];
    const fn bit(&self) -> u64 {
        1 << (*self as u8)
    }
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ContentRead => "content.read",
            Self::ContentWrite => "content.write",
            Self::Search => "search",
            Self::ClusterState => "cluster.state",
            Self::MetricsRead => "metrics.read",
            Self::Admin => "admin",
        }
    }
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().find(|c| c.name() == name).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// A set of capabilities, held as a bitmask
pub struct CapabilitySet {
    mask: u64,
}

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self { mask: 0 }
    }
    pub const fn all() -> Self {
        let mut mask = 0;
        let mut i = 0;
        while i < Capability::ALL.len() {
            mask |= Capability::ALL[i].bit();
            i += 1;
        }
        Self { mask }
    }
    pub const fn of(caps: &[Capability]) -> Self {
        let mut mask = 0;
        let mut i = 0;
        while i < caps.len() {
            mask |= caps[i].bit();
            i += 1;
        }
        Self { mask }
    }
    /// Parse a set from capability names; unknown names fail the whole parse
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Option<Self> {
        let mut set = Self::empty();
        for name in names {
            set.mask |= Capability::from_name(name.as_ref())?.bit();
        }
        Some(set)
    }
    pub const fn with(self, cap: Capability) -> Self {
        Self {
            mask: self.mask | cap.bit(),
        }
    }
    pub const fn union(self, other: Self) -> Self {
        Self {
            mask: self.mask | other.mask,
        }
    }
    pub const fn contains(&self, cap: Capability) -> bool {
        self.mask & cap.bit() != 0
    }
    /// True iff every capability in `other` is present in this set
    pub const fn contains_all(&self, other: Self) -> bool {
        self.mask & other.mask == other.mask
    }
    pub const fn is_empty(&self) -> bool {
        self.mask == 0
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        write!(f, "[")?;
        for cap in Capability::ALL {
            if self.contains(cap) {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{}", cap.name())?;
                first = false;
            }
        }
        write!(f, "]")
    }
}

/// Runs before the handler of the method it is installed on. Returning false
/// fails the request back to the caller with PERMISSION_DENIED and the handler
/// is never invoked. Implementations must be thread safe
pub trait AccessFilter: Send + Sync {
    fn allow(&self, req: &RpcRequest) -> bool;
}

/// An access filter that admits a request only when the connection it arrived
/// on authenticated at least the given capability set
pub struct RequireCapabilities {
    required: CapabilitySet,
}

impl RequireCapabilities {
    pub const fn new(required: CapabilitySet) -> Self {
        Self { required }
    }
    pub fn of(cap: Capability) -> Box<dyn AccessFilter> {
        Box::new(Self::new(CapabilitySet::empty().with(cap)))
    }
    pub fn of_set(required: CapabilitySet) -> Box<dyn AccessFilter> {
        Box::new(Self::new(required))
    }
}

impl AccessFilter for RequireCapabilities {
    fn allow(&self, req: &RpcRequest) -> bool {
        let Some(conn) = req.connection() else {
            // a request with no transport attached has nothing to authorize
            warn!(
                "denying RPC method '{}': no connection to authorize against",
                req.method_name()
            );
            return false;
        };
        let granted = conn.auth_caps();
        let authorized = granted.contains_all(self.required);
        if !authorized {
            warn!(
                "permission denied for RPC method '{}'. Peer at {} has {}, but the call requires {}",
                req.method_name(),
                conn.peer(),
                granted,
                self.required,
            );
        }
        authorized
    }
}
