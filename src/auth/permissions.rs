//! Role and permission predicates.
//!
//! Everything here is a pure function over roles that were already fetched.
//! A role holding `*` grants every permission, including ones nobody has
//! defined yet. Role names compare case-insensitively; permission strings
//! compare exactly.

use crate::model::{Permission, Role};
use std::collections::BTreeSet;

/// Union of the permissions granted by a set of roles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EffectivePermissions {
    /// At least one role holds the wildcard.
    All,
    Set(BTreeSet<String>),
}

impl EffectivePermissions {
    #[must_use]
    pub fn contains(&self, permission: &str) -> bool {
        match self {
            Self::All => true,
            Self::Set(set) => set.contains(permission),
        }
    }

    /// Flattened view for responses; the wildcard renders as `["*"]`.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::All => vec![Permission::WILDCARD.to_string()],
            Self::Set(set) => set.iter().cloned().collect(),
        }
    }
}

#[must_use]
pub fn effective_permissions(roles: &[Role]) -> EffectivePermissions {
    let mut set = BTreeSet::new();
    for permission in roles.iter().flat_map(|role| role.permissions.iter()) {
        if permission.is_wildcard() {
            return EffectivePermissions::All;
        }
        set.insert(permission.as_str().to_string());
    }
    EffectivePermissions::Set(set)
}

#[must_use]
pub fn has_permission(roles: &[Role], permission: &str) -> bool {
    roles.iter().flat_map(|role| role.permissions.iter()).any(|granted| {
        granted.is_wildcard() || granted.as_str() == permission
    })
}

/// True when every listed permission is granted. An empty list is satisfied.
#[must_use]
pub fn has_all_permissions<S: AsRef<str>>(roles: &[Role], permissions: &[S]) -> bool {
    let effective = effective_permissions(roles);
    permissions.iter().all(|p| effective.contains(p.as_ref()))
}

/// Required permissions the roles do not grant, in the order they were asked for.
#[must_use]
pub fn missing_permissions<S: AsRef<str>>(roles: &[Role], permissions: &[S]) -> Vec<String> {
    let effective = effective_permissions(roles);
    permissions
        .iter()
        .map(AsRef::as_ref)
        .filter(|p| !effective.contains(p))
        .map(ToString::to_string)
        .collect()
}

/// True when at least one role matches one of `names`. No names means false.
#[must_use]
pub fn has_any_role<S: AsRef<str>>(roles: &[Role], names: &[S]) -> bool {
    names
        .iter()
        .any(|name| roles.iter().any(|role| role.name.eq_ignore_ascii_case(name.as_ref())))
}

/// True when every name in `names` matches a role. No names means true.
#[must_use]
pub fn has_all_roles<S: AsRef<str>>(roles: &[Role], names: &[S]) -> bool {
    names
        .iter()
        .all(|name| roles.iter().any(|role| role.name.eq_ignore_ascii_case(name.as_ref())))
}
