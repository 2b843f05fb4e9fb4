// SPDX-License-Identifier: MIT OR Apache-2.0

use sqlx::{FromRow, query, query_as};
use trellis_core::{
    InviteId, InviteStatus, InviteToken, Permission, Timestamp, UserId, WorkspaceId,
    WorkspaceInvite, WorkspaceMember,
};

use crate::invites::{AcceptOutcome, InviteStore};
use crate::members::upsert_member;
use crate::sqlite::{SqliteError, SqliteStore, decode};

const SELECT_INVITE: &str = "
    SELECT
        id,
        workspace_id,
        invited_by,
        email,
        user_id,
        role,
        permissions,
        token,
        expires_at,
        status,
        message,
        accepted_at,
        created_at,
        updated_at
    FROM
        workspace_invites
";

impl InviteStore for SqliteStore {
    type Error = SqliteError;

    async fn invite(&self, id: &InviteId) -> Result<Option<WorkspaceInvite>, Self::Error> {
        let row = self
            .execute(async |pool| {
                query_as::<_, InviteRow>(&format!("{SELECT_INVITE} WHERE id = ?"))
                    .bind(id.to_hex())
                    .fetch_optional(pool)
                    .await
                    .map_err(SqliteError::Sqlite)
            })
            .await?;

        row.map(WorkspaceInvite::try_from).transpose()
    }

    async fn pending_invite_by_token(
        &self,
        token: &InviteToken,
    ) -> Result<Option<WorkspaceInvite>, Self::Error> {
        let row = self
            .execute(async |pool| {
                query_as::<_, InviteRow>(&format!(
                    "{SELECT_INVITE} WHERE token = ? AND status = 'pending'"
                ))
                .bind(token.to_hex())
                .fetch_optional(pool)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;

        row.map(WorkspaceInvite::try_from).transpose()
    }

    async fn has_pending_invite(
        &self,
        workspace_id: &WorkspaceId,
        email: &str,
    ) -> Result<bool, Self::Error> {
        let result = self
            .execute(async |pool| {
                query(
                    "
                    SELECT
                        1
                    FROM
                        workspace_invites
                    WHERE
                        workspace_id = ?
                        AND email = ?
                        AND status = 'pending'
                    ",
                )
                .bind(workspace_id.to_hex())
                .bind(email)
                .fetch_optional(pool)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;
        Ok(result.is_some())
    }

    async fn insert_invite(&self, invite: &WorkspaceInvite) -> Result<(), Self::Error> {
        let permissions = serde_json::to_string(&invite.permissions)
            .map_err(|err| SqliteError::Encode("permissions".to_string(), err))?;

        self.tx(async |tx| {
            query(
                "
                INSERT INTO
                    workspace_invites (
                        id,
                        workspace_id,
                        invited_by,
                        email,
                        user_id,
                        role,
                        permissions,
                        token,
                        expires_at,
                        status,
                        message,
                        accepted_at,
                        created_at,
                        updated_at
                    )
                VALUES
                    (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(invite.id.to_hex())
            .bind(invite.workspace_id.to_hex())
            .bind(invite.invited_by.to_hex())
            .bind(&invite.email)
            .bind(invite.user_id.map(|id| id.to_hex()))
            .bind(invite.role.as_str())
            .bind(permissions)
            .bind(invite.token.to_hex())
            .bind(i64::from(invite.expires_at))
            .bind(invite.status.as_str())
            .bind(&invite.message)
            .bind(invite.accepted_at.map(i64::from))
            .bind(i64::from(invite.created_at))
            .bind(i64::from(invite.updated_at))
            .execute(&mut **tx)
            .await?;
            Ok(())
        })
        .await
    }

    async fn transition_invite(
        &self,
        id: &InviteId,
        status: InviteStatus,
        now: Timestamp,
    ) -> Result<bool, Self::Error> {
        let result = self
            .tx(async |tx| {
                query(
                    "
                    UPDATE
                        workspace_invites
                    SET
                        status = ?,
                        updated_at = ?
                    WHERE
                        id = ?
                        AND status = 'pending'
                    ",
                )
                .bind(status.as_str())
                .bind(i64::from(now))
                .bind(id.to_hex())
                .execute(&mut **tx)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn accept_invite(
        &self,
        id: &InviteId,
        user_id: &UserId,
        member: &WorkspaceMember,
        now: Timestamp,
    ) -> Result<AcceptOutcome, Self::Error> {
        self.tx(async |tx| {
            let result = query(
                "
                UPDATE
                    workspace_invites
                SET
                    status = 'accepted',
                    user_id = ?,
                    accepted_at = ?,
                    updated_at = ?
                WHERE
                    id = ?
                    AND status = 'pending'
                ",
            )
            .bind(user_id.to_hex())
            .bind(i64::from(now))
            .bind(i64::from(now))
            .bind(id.to_hex())
            .execute(&mut **tx)
            .await?;

            // Another writer closed the invitation between our read and this update.
            if result.rows_affected() == 0 {
                return Ok(AcceptOutcome::NotPending);
            }

            if !upsert_member(tx, member).await? {
                return Ok(AcceptOutcome::AlreadyMember);
            }

            Ok(AcceptOutcome::Accepted)
        })
        .await
    }

    async fn expire_invites(&self, now: Timestamp) -> Result<u64, Self::Error> {
        let result = self
            .tx(async |tx| {
                query(
                    "
                    UPDATE
                        workspace_invites
                    SET
                        status = 'expired',
                        updated_at = ?1
                    WHERE
                        status = 'pending'
                        AND expires_at < ?1
                    ",
                )
                .bind(i64::from(now))
                .execute(&mut **tx)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;
        Ok(result.rows_affected())
    }

    async fn expire_invites_for_email(
        &self,
        workspace_id: &WorkspaceId,
        email: &str,
        now: Timestamp,
    ) -> Result<u64, Self::Error> {
        let result = self
            .tx(async |tx| {
                query(
                    "
                    UPDATE
                        workspace_invites
                    SET
                        status = 'expired',
                        updated_at = ?1
                    WHERE
                        workspace_id = ?2
                        AND email = ?3
                        AND status = 'pending'
                        AND expires_at < ?1
                    ",
                )
                .bind(i64::from(now))
                .bind(workspace_id.to_hex())
                .bind(email)
                .execute(&mut **tx)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;
        Ok(result.rows_affected())
    }

    async fn workspace_invites(
        &self,
        workspace_id: &WorkspaceId,
        include_past: bool,
    ) -> Result<Vec<WorkspaceInvite>, Self::Error> {
        let rows = self
            .execute(async |pool| {
                query_as::<_, InviteRow>(&format!(
                    "{SELECT_INVITE}
                    WHERE
                        workspace_id = ?
                        AND (? OR status = 'pending')
                    ORDER BY
                        created_at DESC"
                ))
                .bind(workspace_id.to_hex())
                .bind(include_past)
                .fetch_all(pool)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;

        rows.into_iter().map(WorkspaceInvite::try_from).collect()
    }

    async fn pending_invites_for_email(
        &self,
        email: &str,
        now: Timestamp,
    ) -> Result<Vec<WorkspaceInvite>, Self::Error> {
        let rows = self
            .execute(async |pool| {
                query_as::<_, InviteRow>(&format!(
                    "{SELECT_INVITE}
                    WHERE
                        email = ?
                        AND status = 'pending'
                        AND expires_at >= ?
                    ORDER BY
                        created_at DESC"
                ))
                .bind(email)
                .bind(i64::from(now))
                .fetch_all(pool)
                .await
                .map_err(SqliteError::Sqlite)
            })
            .await?;

        rows.into_iter().map(WorkspaceInvite::try_from).collect()
    }
}

#[derive(Debug, FromRow)]
struct InviteRow {
    id: String,
    workspace_id: String,
    invited_by: String,
    email: String,
    user_id: Option<String>,
    role: String,
    permissions: String,
    token: String,
    expires_at: i64,
    status: String,
    message: Option<String>,
    accepted_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<InviteRow> for WorkspaceInvite {
    type Error = SqliteError;

    fn try_from(row: InviteRow) -> Result<Self, Self::Error> {
        let permissions: Vec<Permission> =
            decode("permissions", serde_json::from_str(&row.permissions))?;

        Ok(WorkspaceInvite {
            id: decode("id", row.id.parse())?,
            workspace_id: decode("workspace_id", row.workspace_id.parse())?,
            invited_by: decode("invited_by", row.invited_by.parse())?,
            email: row.email,
            user_id: row
                .user_id
                .map(|value| decode("user_id", value.parse()))
                .transpose()?,
            role: decode("role", row.role.parse())?,
            permissions,
            token: decode("token", row.token.parse())?,
            expires_at: row.expires_at.into(),
            status: decode("status", row.status.parse())?,
            message: row.message,
            accepted_at: row.accepted_at.map(Timestamp::from),
            created_at: row.created_at.into(),
            updated_at: row.updated_at.into(),
        })
    }
}
