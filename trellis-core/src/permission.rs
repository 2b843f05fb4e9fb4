// SPDX-License-Identifier: MIT OR Apache-2.0

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named permission of the form `resource:action`, for example `connection:create`.
///
/// Permissions are checked against the grants a principal resolves to in a workspace. Greater
/// roles are not implied by string comparison, every grant is listed explicitly (see
/// [`Role::default_permissions`]).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WORKSPACE_READ: Permission = Permission::from_static("workspace:read");
    pub const WORKSPACE_INVITE: Permission = Permission::from_static("workspace:invite");
    pub const WORKSPACE_TRANSFER: Permission = Permission::from_static("workspace:transfer");
    pub const CONNECTION_READ: Permission = Permission::from_static("connection:read");
    pub const CONNECTION_CREATE: Permission = Permission::from_static("connection:create");
    pub const CONNECTION_UPDATE: Permission = Permission::from_static("connection:update");
    pub const CONNECTION_DELETE: Permission = Permission::from_static("connection:delete");
    pub const MEMBER_UPDATE: Permission = Permission::from_static("member:update");
    pub const MEMBER_REMOVE: Permission = Permission::from_static("member:remove");

    // Only for constants known to match the permission format, see test below.
    const fn from_static(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }

    /// Parse and validate a permission string.
    pub fn new(value: &str) -> Result<Self, PermissionError> {
        static PERMISSION_REGEX: LazyLock<Regex> =
            LazyLock::new(|| Regex::new("^[a-z]+:[a-z_]+$").expect("valid regular expression"));

        if PERMISSION_REGEX.is_match(value) {
            Ok(Self(Cow::Owned(value.to_owned())))
        } else {
            Err(PermissionError::InvalidFormat(value.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn resource(&self) -> &str {
        self.0.split_once(':').map(|(resource, _)| resource).unwrap_or_default()
    }

    pub fn action(&self) -> &str {
        self.0.split_once(':').map(|(_, action)| action).unwrap_or_default()
    }
}

impl Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Permission {
    type Err = PermissionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl TryFrom<String> for Permission {
    type Error = PermissionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.0.into_owned()
    }
}

/// Flat set of roles a workspace member can hold.
///
/// Roles do not inherit from each other, each one maps to a fixed list of default grants.
/// Explicit per-member permissions are layered on top of these defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Editor,
    Viewer,
}

const OWNER_PERMISSIONS: &[Permission] = &[
    Permission::WORKSPACE_READ,
    Permission::WORKSPACE_INVITE,
    Permission::WORKSPACE_TRANSFER,
    Permission::CONNECTION_READ,
    Permission::CONNECTION_CREATE,
    Permission::CONNECTION_UPDATE,
    Permission::CONNECTION_DELETE,
    Permission::MEMBER_UPDATE,
    Permission::MEMBER_REMOVE,
];

const ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::WORKSPACE_READ,
    Permission::WORKSPACE_INVITE,
    Permission::CONNECTION_READ,
    Permission::CONNECTION_CREATE,
    Permission::CONNECTION_UPDATE,
    Permission::CONNECTION_DELETE,
    Permission::MEMBER_UPDATE,
    Permission::MEMBER_REMOVE,
];

const EDITOR_PERMISSIONS: &[Permission] = &[
    Permission::WORKSPACE_READ,
    Permission::CONNECTION_READ,
    Permission::CONNECTION_CREATE,
    Permission::CONNECTION_UPDATE,
    Permission::CONNECTION_DELETE,
];

const VIEWER_PERMISSIONS: &[Permission] =
    &[Permission::WORKSPACE_READ, Permission::CONNECTION_READ];

impl Role {
    /// Grants every holder of this role receives in a workspace.
    pub fn default_permissions(&self) -> &'static [Permission] {
        match self {
            Role::Owner => OWNER_PERMISSIONS,
            Role::Admin => ADMIN_PERMISSIONS,
            Role::Editor => EDITOR_PERMISSIONS,
            Role::Viewer => VIEWER_PERMISSIONS,
        }
    }

    /// Resolve the complete grant set of this role combined with explicit extra permissions.
    pub fn resolve<'a>(
        &self,
        extra: impl IntoIterator<Item = &'a Permission>,
    ) -> BTreeSet<Permission> {
        self.default_permissions()
            .iter()
            .chain(extra)
            .cloned()
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = PermissionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            _ => Err(PermissionError::UnknownRole(value.to_owned())),
        }
    }
}

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("permission '{0}' does not match the format 'resource:action'")]
    InvalidFormat(String),

    #[error("unknown role '{0}'")]
    UnknownRole(String),
}
