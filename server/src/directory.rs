//! Profiles, servers, memberships, channels and conversations.
//!
//! Plain data access; who may call what is decided in [`crate::manage`].

use anyhow::{anyhow, Result};
use parley_proto::{
    Channel, ChannelKind, Conversation, Member, MemberProfile, Profile, Role, Server,
    GENERAL_CHANNEL,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::{
    config::Bootstrap,
    store::{now_millis, role_at, uuid_at},
};

/// A freshly created server with its owner membership and default channel.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub id: Uuid,
    pub name: String,
    pub invite_code: String,
    pub owner: Member,
    pub general_channel: Uuid,
}

fn new_invite_code() -> String {
    Uuid::new_v4().to_string()
}

pub fn create_profile(conn: &Connection, name: &str, image_url: Option<&str>) -> Result<Profile> {
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("invalid_name"));
    }
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO profiles (id, name, image_url, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id.to_string(), name, image_url, now_millis()],
    )?;
    Ok(Profile {
        id,
        name: name.into(),
        image_url: image_url.map(Into::into),
    })
}

/// Create a server owned by `owner`, who joins it as admin. A `general`
/// channel is created alongside.
pub fn create_server(
    conn: &Connection,
    owner: &Profile,
    name: &str,
    image_url: Option<&str>,
) -> Result<ServerInfo> {
    let id = Uuid::new_v4();
    let invite_code = new_invite_code();
    conn.execute(
        "INSERT INTO servers (id, name, image_url, invite_code, profile_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.to_string(),
            name,
            image_url,
            invite_code,
            owner.id.to_string(),
            now_millis()
        ],
    )?;
    let member = add_member(conn, &id, &owner.id, Role::Admin)?;
    let general = create_channel(conn, &id, &owner.id, GENERAL_CHANNEL, ChannelKind::Text)?;
    Ok(ServerInfo {
        id,
        name: name.into(),
        invite_code,
        owner: member,
        general_channel: general.id,
    })
}

/// Server with its members (admins first) and channels.
pub fn load_server(conn: &Connection, server_id: &Uuid) -> Result<Option<Server>> {
    let head = conn
        .query_row(
            "SELECT id, name, image_url, invite_code, profile_id FROM servers WHERE id = ?1",
            [server_id.to_string()],
            |row| {
                Ok(Server {
                    id: uuid_at(row, 0)?,
                    name: row.get(1)?,
                    image_url: row.get(2)?,
                    invite_code: row.get(3)?,
                    profile_id: uuid_at(row, 4)?,
                    members: Vec::new(),
                    channels: Vec::new(),
                })
            },
        )
        .optional()?;
    let Some(mut server) = head else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT m.id, m.role, p.id, p.name, p.image_url FROM members m \
         JOIN profiles p ON p.id = m.profile_id WHERE m.server_id = ?1 \
         ORDER BY CASE m.role WHEN 'ADMIN' THEN 0 WHEN 'MODERATOR' THEN 1 ELSE 2 END, m.created_at, m.id",
    )?;
    server.members = stmt
        .query_map([server_id.to_string()], |row| {
            Ok(MemberProfile {
                id: uuid_at(row, 0)?,
                role: role_at(row, 1)?,
                profile: Profile {
                    id: uuid_at(row, 2)?,
                    name: row.get(3)?,
                    image_url: row.get(4)?,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut stmt = conn.prepare(
        "SELECT id, name, kind, server_id FROM channels WHERE server_id = ?1 ORDER BY created_at, id",
    )?;
    server.channels = stmt
        .query_map([server_id.to_string()], row_to_channel)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(server))
}

/// Owner profile of a server.
pub fn server_owner(conn: &Connection, server_id: &Uuid) -> Result<Option<Uuid>> {
    let owner = conn
        .query_row(
            "SELECT profile_id FROM servers WHERE id = ?1",
            [server_id.to_string()],
            |row| uuid_at(row, 0),
        )
        .optional()?;
    Ok(owner)
}

pub fn update_server(
    conn: &Connection,
    server_id: &Uuid,
    name: &str,
    image_url: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE servers SET name = ?2, image_url = ?3 WHERE id = ?1",
        params![server_id.to_string(), name, image_url],
    )?;
    Ok(())
}

/// Delete a server. Members, channels, conversations and every message in
/// them go with it.
pub fn delete_server(conn: &Connection, server_id: &Uuid) -> Result<()> {
    conn.execute("DELETE FROM servers WHERE id = ?1", [server_id.to_string()])?;
    Ok(())
}

/// Replace the invite code; the old one stops working.
pub fn rotate_invite_code(conn: &Connection, server_id: &Uuid) -> Result<String> {
    let code = new_invite_code();
    conn.execute(
        "UPDATE servers SET invite_code = ?2 WHERE id = ?1",
        params![server_id.to_string(), code],
    )?;
    Ok(code)
}

pub fn server_by_invite(conn: &Connection, invite_code: &str) -> Result<Option<Uuid>> {
    let id = conn
        .query_row(
            "SELECT id FROM servers WHERE invite_code = ?1",
            [invite_code],
            |row| uuid_at(row, 0),
        )
        .optional()?;
    Ok(id)
}

pub fn add_member(conn: &Connection, server_id: &Uuid, profile_id: &Uuid, role: Role) -> Result<Member> {
    let id = Uuid::new_v4();
    let res = conn.execute(
        "INSERT INTO members (id, role, profile_id, server_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id.to_string(),
            role.as_str(),
            profile_id.to_string(),
            server_id.to_string(),
            now_millis()
        ],
    );
    match res {
        Ok(_) => Ok(Member {
            id,
            role,
            profile_id: *profile_id,
            server_id: *server_id,
        }),
        Err(e)
            if matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::ConstraintViolation)
            ) =>
        {
            Err(anyhow!("already_member"))
        }
        Err(e) => Err(e.into()),
    }
}

fn row_to_member(row: &Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        id: uuid_at(row, 0)?,
        role: role_at(row, 1)?,
        profile_id: uuid_at(row, 2)?,
        server_id: uuid_at(row, 3)?,
    })
}

/// Membership of a profile in a server.
pub fn find_member(conn: &Connection, server_id: &Uuid, profile_id: &Uuid) -> Result<Option<Member>> {
    let member = conn
        .query_row(
            "SELECT id, role, profile_id, server_id FROM members WHERE server_id = ?1 AND profile_id = ?2",
            params![server_id.to_string(), profile_id.to_string()],
            row_to_member,
        )
        .optional()?;
    Ok(member)
}

/// Member by id, only if it belongs to `server_id`.
pub fn member_by_id(conn: &Connection, server_id: &Uuid, member_id: &Uuid) -> Result<Option<Member>> {
    let member = conn
        .query_row(
            "SELECT id, role, profile_id, server_id FROM members WHERE server_id = ?1 AND id = ?2",
            params![server_id.to_string(), member_id.to_string()],
            row_to_member,
        )
        .optional()?;
    Ok(member)
}

pub fn set_role(conn: &Connection, member_id: &Uuid, role: Role) -> Result<()> {
    conn.execute(
        "UPDATE members SET role = ?2 WHERE id = ?1",
        params![member_id.to_string(), role.as_str()],
    )?;
    Ok(())
}

/// Remove a membership together with its conversations and messages.
pub fn remove_member(conn: &Connection, member_id: &Uuid) -> Result<()> {
    conn.execute("DELETE FROM members WHERE id = ?1", [member_id.to_string()])?;
    Ok(())
}

fn row_to_channel(row: &Row<'_>) -> rusqlite::Result<Channel> {
    let raw: String = row.get(2)?;
    Ok(Channel {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        kind: ChannelKind::parse(&raw).unwrap_or_default(),
        server_id: uuid_at(row, 3)?,
    })
}

pub fn create_channel(
    conn: &Connection,
    server_id: &Uuid,
    profile_id: &Uuid,
    name: &str,
    kind: ChannelKind,
) -> Result<Channel> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO channels (id, name, kind, profile_id, server_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.to_string(),
            name,
            kind.as_str(),
            profile_id.to_string(),
            server_id.to_string(),
            now_millis()
        ],
    )?;
    Ok(Channel {
        id,
        name: name.into(),
        kind,
        server_id: *server_id,
    })
}

/// Channel by id, only if it belongs to `server_id`.
pub fn find_channel(conn: &Connection, server_id: &Uuid, channel_id: &Uuid) -> Result<Option<Channel>> {
    let channel = conn
        .query_row(
            "SELECT id, name, kind, server_id FROM channels WHERE server_id = ?1 AND id = ?2",
            params![server_id.to_string(), channel_id.to_string()],
            row_to_channel,
        )
        .optional()?;
    Ok(channel)
}

pub fn update_channel(conn: &Connection, channel_id: &Uuid, name: &str, kind: ChannelKind) -> Result<()> {
    conn.execute(
        "UPDATE channels SET name = ?2, kind = ?3 WHERE id = ?1",
        params![channel_id.to_string(), name, kind.as_str()],
    )?;
    Ok(())
}

/// Delete a channel and its messages.
pub fn delete_channel(conn: &Connection, channel_id: &Uuid) -> Result<()> {
    conn.execute("DELETE FROM channels WHERE id = ?1", [channel_id.to_string()])?;
    Ok(())
}

/// Conversation between two members, created on first use. Either order of
/// the pair finds the same conversation.
pub fn get_or_create_conversation(conn: &Connection, a: &Uuid, b: &Uuid) -> Result<Uuid> {
    if a == b {
        return Err(anyhow!("self_conversation"));
    }
    let existing = conn
        .query_row(
            "SELECT id FROM conversations WHERE (member_one_id = ?1 AND member_two_id = ?2) \
             OR (member_one_id = ?2 AND member_two_id = ?1)",
            params![a.to_string(), b.to_string()],
            |row| uuid_at(row, 0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO conversations (id, member_one_id, member_two_id) VALUES (?1, ?2, ?3)",
        params![id.to_string(), a.to_string(), b.to_string()],
    )?;
    Ok(id)
}

pub fn load_conversation(conn: &Connection, id: &Uuid) -> Result<Option<Conversation>> {
    let conversation = conn
        .query_row(
            "SELECT id, member_one_id, member_two_id FROM conversations WHERE id = ?1",
            [id.to_string()],
            |row| {
                Ok(Conversation {
                    id: uuid_at(row, 0)?,
                    member_one_id: uuid_at(row, 1)?,
                    member_two_id: uuid_at(row, 2)?,
                })
            },
        )
        .optional()?;
    Ok(conversation)
}

pub fn is_empty(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))?;
    Ok(count == 0)
}

/// Seed an empty database from the bootstrap settings. Returns `None` when
/// data already exists.
pub fn seed(conn: &Connection, bootstrap: &Bootstrap) -> Result<Option<(Profile, ServerInfo)>> {
    if !is_empty(conn)? {
        return Ok(None);
    }
    let profile = create_profile(conn, &bootstrap.profile, None)?;
    let server = create_server(conn, &profile, &bootstrap.server, None)?;
    Ok(Some((profile, server)))
}
