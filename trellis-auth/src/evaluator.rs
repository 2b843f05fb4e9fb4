// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;

use trellis_core::{Permission, Role, UserId, Workspace, WorkspaceMember};

/// Strategy deriving the grants a user holds in a workspace.
///
/// The evaluator receives the workspace record and the user's _active_ membership, if any. It
/// does not perform lookups on its own.
pub trait PermissionEvaluator {
    fn granted(
        &self,
        user_id: &UserId,
        workspace: &Workspace,
        member: Option<&WorkspaceMember>,
    ) -> BTreeSet<Permission>;
}

/// Only the owner of a workspace may do anything in it, memberships are ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct OwnerOnly;

impl PermissionEvaluator for OwnerOnly {
    fn granted(
        &self,
        user_id: &UserId,
        workspace: &Workspace,
        _member: Option<&WorkspaceMember>,
    ) -> BTreeSet<Permission> {
        if &workspace.owner_id == user_id {
            Role::Owner.resolve([])
        } else {
            BTreeSet::new()
        }
    }
}

/// Owners hold every permission, members the default grants of their role plus their explicit
/// extra permissions.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoleBased;

impl PermissionEvaluator for RoleBased {
    fn granted(
        &self,
        user_id: &UserId,
        workspace: &Workspace,
        member: Option<&WorkspaceMember>,
    ) -> BTreeSet<Permission> {
        let member = member.filter(|member| member.is_active && &member.user_id == user_id);

        let role = if &workspace.owner_id == user_id {
            Some(Role::Owner)
        } else {
            member.map(|member| member.role)
        };

        match role {
            Some(role) => role.resolve(member.into_iter().flat_map(|member| &member.permissions)),
            None => BTreeSet::new(),
        }
    }
}
