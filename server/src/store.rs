//! SQLite-backed storage and identity collaborators.

use anyhow::{Context, Result};
use parley_core::{Container, Identity, MessagePatch, MessageStore, RequestContext};
use parley_proto::{Member, MemberProfile, Message, Profile, Role, Scope, DELETED_CONTENT};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, types::Type, OptionalExtension, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::{self, DbPool};

/// Current time in unix milliseconds.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Table and container column holding messages of a scope.
fn table(scope: Scope) -> (&'static str, &'static str) {
    match scope {
        Scope::Channel => ("messages", "channel_id"),
        Scope::Conversation => ("direct_messages", "conversation_id"),
    }
}

fn select_messages(scope: Scope) -> String {
    let (table, column) = table(scope);
    format!(
        "SELECT x.id, x.content, x.file_url, x.deleted, x.member_id, x.{column}, x.created_at, x.updated_at, \
         m.role, p.id, p.name, p.image_url \
         FROM {table} x JOIN members m ON m.id = x.member_id JOIN profiles p ON p.id = m.profile_id"
    )
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn role_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Role> {
    let raw: String = row.get(idx)?;
    Ok(Role::parse(&raw).unwrap_or_default())
}

fn row_to_msg(row: &Row<'_>) -> rusqlite::Result<Message> {
    let member_id = uuid_at(row, 4)?;
    Ok(Message {
        id: uuid_at(row, 0)?,
        content: row.get(1)?,
        file_url: row.get(2)?,
        deleted: row.get::<_, i64>(3)? != 0,
        member_id,
        container_id: uuid_at(row, 5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        member: MemberProfile {
            id: member_id,
            role: role_at(row, 8)?,
            profile: Profile {
                id: uuid_at(row, 9)?,
                name: row.get(10)?,
                image_url: row.get(11)?,
            },
        },
    })
}

/// Storage collaborator over a pooled SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Ok(Self {
            pool: db::open_pool(path)?,
        })
    }

    pub fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().context("database pool exhausted")
    }

    fn load_message(
        conn: &rusqlite::Connection,
        scope: Scope,
        message_id: Uuid,
    ) -> Result<Option<Message>> {
        let sql = format!("{} WHERE x.id = ?1", select_messages(scope));
        let msg = conn
            .query_row(&sql, [message_id.to_string()], row_to_msg)
            .optional()?;
        Ok(msg)
    }
}

impl MessageStore for SqliteStore {
    fn find_container_for_member(
        &self,
        scope: Scope,
        container_id: Uuid,
        profile_id: Uuid,
    ) -> Result<Option<Container>> {
        let sql = match scope {
            Scope::Channel => {
                "SELECT c.id, c.server_id, m.id, m.role, m.profile_id FROM channels c \
                 JOIN members m ON m.server_id = c.server_id \
                 WHERE c.id = ?1 AND m.profile_id = ?2"
            }
            Scope::Conversation => {
                "SELECT cv.id, m.server_id, m.id, m.role, m.profile_id FROM conversations cv \
                 JOIN members m ON m.id = cv.member_one_id OR m.id = cv.member_two_id \
                 WHERE cv.id = ?1 AND m.profile_id = ?2"
            }
        };
        let conn = self.conn()?;
        let container = conn
            .query_row(
                sql,
                params![container_id.to_string(), profile_id.to_string()],
                |row| {
                    let server_id = uuid_at(row, 1)?;
                    Ok(Container {
                        scope,
                        id: uuid_at(row, 0)?,
                        server_id,
                        caller: Member {
                            id: uuid_at(row, 2)?,
                            role: role_at(row, 3)?,
                            profile_id: uuid_at(row, 4)?,
                            server_id,
                        },
                    })
                },
            )
            .optional()?;
        Ok(container)
    }

    fn find_message(
        &self,
        scope: Scope,
        message_id: Uuid,
        container_id: Uuid,
    ) -> Result<Option<Message>> {
        let (_, column) = table(scope);
        let sql = format!("{} WHERE x.id = ?1 AND x.{column} = ?2", select_messages(scope));
        let conn = self.conn()?;
        let msg = conn
            .query_row(
                &sql,
                params![message_id.to_string(), container_id.to_string()],
                row_to_msg,
            )
            .optional()?;
        Ok(msg)
    }

    fn create_message(
        &self,
        scope: Scope,
        container_id: Uuid,
        member_id: Uuid,
        content: &str,
        file_url: Option<&str>,
    ) -> Result<Message> {
        let (table, column) = table(scope);
        let id = Uuid::new_v4();
        let now = now_millis();
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO {table} (id, content, file_url, member_id, {column}, deleted, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)"
            ),
            params![
                id.to_string(),
                content,
                file_url,
                member_id.to_string(),
                container_id.to_string(),
                now
            ],
        )?;
        Self::load_message(&conn, scope, id)?.context("inserted message vanished")
    }

    fn update_message(
        &self,
        scope: Scope,
        message_id: Uuid,
        patch: &MessagePatch,
    ) -> Result<Message> {
        let (table, _) = table(scope);
        let now = now_millis();
        let conn = self.conn()?;
        // updated_at always moves past created_at so edits stay detectable
        let changed = match patch {
            MessagePatch::Content(content) => conn.execute(
                &format!(
                    "UPDATE {table} SET content = ?2, updated_at = MAX(?3, created_at + 1) \
                     WHERE id = ?1 AND deleted = 0"
                ),
                params![message_id.to_string(), content, now],
            )?,
            MessagePatch::SoftDelete => conn.execute(
                &format!(
                    "UPDATE {table} SET content = ?2, file_url = NULL, deleted = 1, \
                     updated_at = MAX(?3, created_at + 1) WHERE id = ?1 AND deleted = 0"
                ),
                params![message_id.to_string(), DELETED_CONTENT, now],
            )?,
        };
        if changed == 0 {
            anyhow::bail!("message {message_id} is missing or already deleted");
        }
        Self::load_message(&conn, scope, message_id)?.context("updated message vanished")
    }

    fn list_messages(
        &self,
        scope: Scope,
        container_id: Uuid,
        cursor: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let (table, column) = table(scope);
        let conn = self.conn()?;
        let (ts, id) = match cursor {
            Some(cursor) => {
                let ts: Option<i64> = conn
                    .query_row(
                        &format!("SELECT created_at FROM {table} WHERE id = ?1 AND {column} = ?2"),
                        params![cursor.to_string(), container_id.to_string()],
                        |row| row.get(0),
                    )
                    .optional()?;
                match ts {
                    Some(ts) => (ts, cursor.to_string()),
                    // a cursor from another container never matches anything
                    None => return Ok(Vec::new()),
                }
            }
            None => (i64::MAX, String::new()),
        };
        let sql = format!(
            "{} WHERE x.{column} = ?1 AND (x.created_at < ?2 OR (x.created_at = ?2 AND x.id < ?3)) \
             ORDER BY x.created_at DESC, x.id DESC LIMIT ?4",
            select_messages(scope)
        );
        let mut stmt = conn.prepare(&sql)?;
        let msgs = stmt
            .query_map(
                params![container_id.to_string(), ts, id, limit as i64],
                row_to_msg,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(msgs)
    }
}

impl Identity for SqliteStore {
    fn resolve_caller(&self, ctx: &RequestContext) -> Result<Option<Profile>> {
        let Some(id) = ctx
            .subject
            .as_deref()
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            return Ok(None);
        };
        let conn = self.conn()?;
        let profile = conn
            .query_row(
                "SELECT id, name, image_url FROM profiles WHERE id = ?1",
                [id.to_string()],
                |row| {
                    Ok(Profile {
                        id: uuid_at(row, 0)?,
                        name: row.get(1)?,
                        image_url: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }

    fn resolve_member_role(&self, server_id: Uuid, profile_id: Uuid) -> Result<Option<Role>> {
        let conn = self.conn()?;
        let role = conn
            .query_row(
                "SELECT role FROM members WHERE server_id = ?1 AND profile_id = ?2",
                params![server_id.to_string(), profile_id.to_string()],
                |row| role_at(row, 0),
            )
            .optional()?;
        Ok(role)
    }
}
