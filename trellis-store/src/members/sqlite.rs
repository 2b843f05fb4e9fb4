// SPDX-License-Identifier: MIT OR Apache-2.0

use sqlx::{FromRow, query, query_as};
use trellis_core::{Permission, Role, UserId, WorkspaceId, WorkspaceMember};

use crate::members::MemberStore;
use crate::sqlite::{SqliteError, SqliteStore, SqliteTransaction, decode};

impl MemberStore for SqliteStore {
    type Error = SqliteError;

    async fn member(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> Result<Option<WorkspaceMember>, Self::Error> {
        let row = self
            .execute(async |pool| {
                query_as::<_, MemberRow>(
                    "
                    SELECT
                        workspace_id,
                        user_id,
                        role,
                        permissions,
                        invited_by,
                        is_active,
                        joined_at
                    FROM
                        workspace_members
                    WHERE
                        workspace_id = ?
                        AND user_id = ?
                    ",
                )
                .bind(workspace_id.to_hex())
                .bind(user_id.to_hex())
                .fetch_optional(pool)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;

        row.map(WorkspaceMember::try_from).transpose()
    }

    async fn members(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<WorkspaceMember>, Self::Error> {
        let rows = self
            .execute(async |pool| {
                query_as::<_, MemberRow>(
                    "
                    SELECT
                        workspace_id,
                        user_id,
                        role,
                        permissions,
                        invited_by,
                        is_active,
                        joined_at
                    FROM
                        workspace_members
                    WHERE
                        workspace_id = ?
                        AND is_active = 1
                    ORDER BY
                        joined_at
                    ",
                )
                .bind(workspace_id.to_hex())
                .fetch_all(pool)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;

        rows.into_iter().map(WorkspaceMember::try_from).collect()
    }

    async fn upsert_member(&self, member: &WorkspaceMember) -> Result<bool, Self::Error> {
        self.tx(async |tx| upsert_member(tx, member).await).await
    }

    async fn update_member_role(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        role: Role,
    ) -> Result<bool, Self::Error> {
        let result = self
            .tx(async |tx| {
                query(
                    "
                    UPDATE
                        workspace_members
                    SET
                        role = ?
                    WHERE
                        workspace_id = ?
                        AND user_id = ?
                        AND is_active = 1
                    ",
                )
                .bind(role.as_str())
                .bind(workspace_id.to_hex())
                .bind(user_id.to_hex())
                .execute(&mut **tx)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_member(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> Result<bool, Self::Error> {
        let result = self
            .tx(async |tx| {
                query(
                    "
                    UPDATE
                        workspace_members
                    SET
                        is_active = 0
                    WHERE
                        workspace_id = ?
                        AND user_id = ?
                        AND is_active = 1
                    ",
                )
                .bind(workspace_id.to_hex())
                .bind(user_id.to_hex())
                .execute(&mut **tx)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Insert a membership row or re-activate an inactive one within the given transaction.
///
/// Shared with invitation acceptance which needs to write the membership and close the invitation
/// in the same transaction.
pub(crate) async fn upsert_member(
    tx: &mut SqliteTransaction,
    member: &WorkspaceMember,
) -> Result<bool, SqliteError> {
    let permissions = serde_json::to_string(&member.permissions)
        .map_err(|err| SqliteError::Encode("permissions".to_string(), err))?;

    // Existing active rows are left untouched, the WHERE clause of the upsert turns the conflict
    // into a no-op which we detect through the affected rows.
    let result = query(
        "
        INSERT INTO
            workspace_members (
                workspace_id,
                user_id,
                role,
                permissions,
                invited_by,
                is_active,
                joined_at
            )
        VALUES
            (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (workspace_id, user_id) DO UPDATE SET
            role = excluded.role,
            permissions = excluded.permissions,
            invited_by = excluded.invited_by,
            is_active = excluded.is_active,
            joined_at = excluded.joined_at
        WHERE
            workspace_members.is_active = 0
        ",
    )
    .bind(member.workspace_id.to_hex())
    .bind(member.user_id.to_hex())
    .bind(member.role.as_str())
    .bind(permissions)
    .bind(member.invited_by.map(|id| id.to_hex()))
    .bind(member.is_active)
    .bind(i64::from(member.joined_at))
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[derive(Debug, FromRow)]
struct MemberRow {
    workspace_id: String,
    user_id: String,
    role: String,
    permissions: String,
    invited_by: Option<String>,
    is_active: bool,
    joined_at: i64,
}

impl TryFrom<MemberRow> for WorkspaceMember {
    type Error = SqliteError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        Ok(WorkspaceMember {
            workspace_id: decode("workspace_id", row.workspace_id.parse())?,
            user_id: decode("user_id", row.user_id.parse())?,
            role: decode("role", row.role.parse())?,
            permissions: decode(
                "permissions",
                serde_json::from_str::<Vec<Permission>>(&row.permissions),
            )?,
            invited_by: row
                .invited_by
                .map(|id| decode("invited_by", id.parse()))
                .transpose()?,
            is_active: row.is_active,
            joined_at: row.joined_at.into(),
        })
    }
}
