//! Listener roles and the small role set used as a wait mask.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// What a listener thread does for a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Deliver received bytes.
    Data,
    /// Deliver control line (CTS/DSR/DCD/RI) changes.
    Event,
}

impl Role {
    const fn bit(self) -> u8 {
        match self {
            Role::Data => 0b01,
            Role::Event => 0b10,
        }
    }

    /// The other role.
    pub const fn other(self) -> Role {
        match self {
            Role::Data => Role::Event,
            Role::Event => Role::Data,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Data => f.write_str("data"),
            Role::Event => f.write_str("event"),
        }
    }
}

/// A set of [`Role`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RoleSet(u8);

impl RoleSet {
    pub const EMPTY: RoleSet = RoleSet(0);
    pub const DATA: RoleSet = RoleSet(Role::Data.bit());
    pub const EVENT: RoleSet = RoleSet(Role::Event.bit());
    pub const ALL: RoleSet = RoleSet(Role::Data.bit() | Role::Event.bit());

    pub const fn of(role: Role) -> RoleSet {
        RoleSet(role.bit())
    }

    pub const fn contains(self, role: Role) -> bool {
        self.0 & role.bit() != 0
    }

    pub const fn intersects(self, other: RoleSet) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn intersection(self, other: RoleSet) -> RoleSet {
        RoleSet(self.0 & other.0)
    }

    pub const fn with(self, role: Role) -> RoleSet {
        RoleSet(self.0 | role.bit())
    }

    pub const fn without(self, role: Role) -> RoleSet {
        RoleSet(self.0 & !role.bit())
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Role> {
        [Role::Data, Role::Event]
            .into_iter()
            .filter(move |role| self.contains(*role))
    }
}

impl From<Role> for RoleSet {
    fn from(role: Role) -> Self {
        RoleSet::of(role)
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|r| r.to_string()).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

/// A [`RoleSet`] that can be changed from the registering thread while a
/// listener thread reads it.
#[derive(Debug, Default)]
pub struct AtomicRoleSet(AtomicU8);

impl AtomicRoleSet {
    pub fn new(initial: RoleSet) -> Self {
        Self(AtomicU8::new(initial.0))
    }

    pub fn load(&self) -> RoleSet {
        RoleSet(self.0.load(Ordering::Acquire))
    }

    /// Add a role and return the resulting set.
    pub fn add(&self, role: Role) -> RoleSet {
        RoleSet(self.0.fetch_or(role.bit(), Ordering::AcqRel) | role.bit())
    }

    /// Remove a role and return the remaining set.
    pub fn remove(&self, role: Role) -> RoleSet {
        RoleSet(self.0.fetch_and(!role.bit(), Ordering::AcqRel) & !role.bit())
    }

    pub fn contains(&self, role: Role) -> bool {
        self.load().contains(role)
    }
}
