//! Who may change servers, memberships, channels and conversations.
//!
//! Every operation resolves the caller's membership first. Callers outside a
//! server get `NotFound`, members without the needed role get `Forbidden`.
//! Owner-only: server update/delete, invite rotation, role changes, kicks.
//! Admins and moderators: channel create/update/delete.

use parley_core::{ChatError, ChatResult};
use parley_proto::{
    ChannelKind, Conversation, Member, Profile, Role, Server, GENERAL_CHANNEL,
};
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use crate::directory;

pub const SERVER_NOT_FOUND: &str = "Server not found";
pub const MEMBER_NOT_FOUND: &str = "Member not found";
pub const CHANNEL_NOT_FOUND: &str = "Channel not found";

fn not_found(what: &str) -> ChatError {
    ChatError::NotFound(what.into())
}

fn bad_request(what: &str) -> ChatError {
    ChatError::BadRequest(what.into())
}

/// Parse a required id. Absent or blank is a bad request; anything that is
/// not a uuid cannot name a row.
pub fn parse_id(raw: Option<&str>, missing: &str, unknown: &str) -> ChatResult<Uuid> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty());
    let raw = raw.ok_or_else(|| bad_request(missing))?;
    Uuid::parse_str(raw).map_err(|_| not_found(unknown))
}

fn required_name(name: Option<&str>) -> ChatResult<&str> {
    name.map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_request("Name missing"))
}

fn load(conn: &Connection, server_id: &Uuid) -> ChatResult<Server> {
    directory::load_server(conn, server_id)?.ok_or_else(|| not_found(SERVER_NOT_FOUND))
}

fn membership(conn: &Connection, server_id: &Uuid, caller: &Profile) -> ChatResult<Member> {
    directory::find_member(conn, server_id, &caller.id)?.ok_or_else(|| not_found(SERVER_NOT_FOUND))
}

fn require_owner(conn: &Connection, server_id: &Uuid, caller: &Profile) -> ChatResult<()> {
    membership(conn, server_id, caller)?;
    match directory::server_owner(conn, server_id)? {
        Some(owner) if owner == caller.id => Ok(()),
        _ => Err(ChatError::Forbidden),
    }
}

fn require_moderator(conn: &Connection, server_id: &Uuid, caller: &Profile) -> ChatResult<Member> {
    let member = membership(conn, server_id, caller)?;
    if member.role.can_moderate() {
        Ok(member)
    } else {
        Err(ChatError::Forbidden)
    }
}

/// Another member of the server, never the caller's own membership.
fn other_member(
    conn: &Connection,
    server_id: &Uuid,
    member_id: &Uuid,
    caller: &Profile,
) -> ChatResult<Member> {
    let target = directory::member_by_id(conn, server_id, member_id)?
        .ok_or_else(|| not_found(MEMBER_NOT_FOUND))?;
    if target.profile_id == caller.id {
        return Err(bad_request("Cannot change your own membership"));
    }
    Ok(target)
}

pub fn create_server(
    conn: &Connection,
    caller: &Profile,
    name: Option<&str>,
    image_url: Option<&str>,
) -> ChatResult<Server> {
    let name = required_name(name)?;
    let info = directory::create_server(conn, caller, name, image_url)?;
    info!(server_id = %info.id, owner = %caller.id, "server created");
    load(conn, &info.id)
}

pub fn get_server(conn: &Connection, caller: &Profile, server_id: &Uuid) -> ChatResult<Server> {
    membership(conn, server_id, caller)?;
    load(conn, server_id)
}

/// Rename the server or change its image. Omitted fields keep their value.
pub fn update_server(
    conn: &Connection,
    caller: &Profile,
    server_id: &Uuid,
    name: Option<&str>,
    image_url: Option<&str>,
) -> ChatResult<Server> {
    require_owner(conn, server_id, caller)?;
    let current = load(conn, server_id)?;
    let name = match name {
        Some(name) => required_name(Some(name))?,
        None => current.name.as_str(),
    };
    let image_url = image_url.or(current.image_url.as_deref());
    directory::update_server(conn, server_id, name, image_url)?;
    load(conn, server_id)
}

/// Delete the server and everything in it. Returns its last state.
pub fn delete_server(conn: &Connection, caller: &Profile, server_id: &Uuid) -> ChatResult<Server> {
    require_owner(conn, server_id, caller)?;
    let server = load(conn, server_id)?;
    directory::delete_server(conn, server_id)?;
    info!(server_id = %server_id, "server deleted");
    Ok(server)
}

pub fn rotate_invite(conn: &Connection, caller: &Profile, server_id: &Uuid) -> ChatResult<Server> {
    require_owner(conn, server_id, caller)?;
    directory::rotate_invite_code(conn, server_id)?;
    load(conn, server_id)
}

/// Join the server behind an invite code as a guest. Joining twice is a
/// no-op that returns the server.
pub fn join(conn: &Connection, caller: &Profile, invite_code: &str) -> ChatResult<Server> {
    let server_id = directory::server_by_invite(conn, invite_code.trim())?
        .ok_or_else(|| not_found("Invite not found"))?;
    if directory::find_member(conn, &server_id, &caller.id)?.is_none() {
        let member = directory::add_member(conn, &server_id, &caller.id, Role::Guest)?;
        info!(server_id = %server_id, member_id = %member.id, "member joined");
    }
    load(conn, &server_id)
}

/// Leave a server. The owner cannot leave; it can only delete the server.
pub fn leave(conn: &Connection, caller: &Profile, server_id: &Uuid) -> ChatResult<Server> {
    let member = membership(conn, server_id, caller)?;
    if directory::server_owner(conn, server_id)? == Some(caller.id) {
        return Err(bad_request("Owner cannot leave the server"));
    }
    let server = load(conn, server_id)?;
    directory::remove_member(conn, &member.id)?;
    info!(server_id = %server_id, member_id = %member.id, "member left");
    Ok(server)
}

pub fn change_role(
    conn: &Connection,
    caller: &Profile,
    server_id: &Uuid,
    member_id: &Uuid,
    role: Option<&str>,
) -> ChatResult<Server> {
    let role = role.ok_or_else(|| bad_request("Role missing"))?;
    let role = Role::parse(role).ok_or_else(|| bad_request("Invalid role"))?;
    require_owner(conn, server_id, caller)?;
    let target = other_member(conn, server_id, member_id, caller)?;
    directory::set_role(conn, &target.id, role)?;
    info!(server_id = %server_id, member_id = %target.id, role = role.as_str(), "role changed");
    load(conn, server_id)
}

/// Remove another member. Its conversations and messages go with it.
pub fn kick(
    conn: &Connection,
    caller: &Profile,
    server_id: &Uuid,
    member_id: &Uuid,
) -> ChatResult<Server> {
    require_owner(conn, server_id, caller)?;
    let target = other_member(conn, server_id, member_id, caller)?;
    directory::remove_member(conn, &target.id)?;
    info!(server_id = %server_id, member_id = %target.id, "member kicked");
    load(conn, server_id)
}

fn channel_kind(kind: Option<&str>) -> ChatResult<Option<ChannelKind>> {
    kind.map(|k| ChannelKind::parse(k).ok_or_else(|| bad_request("Invalid channel type")))
        .transpose()
}

fn channel_name(name: &str) -> ChatResult<&str> {
    if name == GENERAL_CHANNEL {
        return Err(bad_request("Name cannot be 'general'"));
    }
    Ok(name)
}

pub fn create_channel(
    conn: &Connection,
    caller: &Profile,
    server_id: &Uuid,
    name: Option<&str>,
    kind: Option<&str>,
) -> ChatResult<Server> {
    let name = channel_name(required_name(name)?)?;
    let kind = channel_kind(kind)?.unwrap_or_default();
    require_moderator(conn, server_id, caller)?;
    directory::create_channel(conn, server_id, &caller.id, name, kind)?;
    load(conn, server_id)
}

/// Rename a channel or change its type. `general` is fixed.
pub fn update_channel(
    conn: &Connection,
    caller: &Profile,
    server_id: &Uuid,
    channel_id: &Uuid,
    name: Option<&str>,
    kind: Option<&str>,
) -> ChatResult<Server> {
    let kind = channel_kind(kind)?;
    let name = name.map(|n| required_name(Some(n)).and_then(channel_name)).transpose()?;
    require_moderator(conn, server_id, caller)?;
    let channel = directory::find_channel(conn, server_id, channel_id)?
        .ok_or_else(|| not_found(CHANNEL_NOT_FOUND))?;
    if channel.name == GENERAL_CHANNEL {
        return Err(bad_request("Channel 'general' cannot be changed"));
    }
    directory::update_channel(
        conn,
        &channel.id,
        name.unwrap_or(&channel.name),
        kind.unwrap_or(channel.kind),
    )?;
    load(conn, server_id)
}

/// Delete a channel and its messages. `general` is fixed.
pub fn delete_channel(
    conn: &Connection,
    caller: &Profile,
    server_id: &Uuid,
    channel_id: &Uuid,
) -> ChatResult<Server> {
    require_moderator(conn, server_id, caller)?;
    let channel = directory::find_channel(conn, server_id, channel_id)?
        .ok_or_else(|| not_found(CHANNEL_NOT_FOUND))?;
    if channel.name == GENERAL_CHANNEL {
        return Err(bad_request("Channel 'general' cannot be changed"));
    }
    directory::delete_channel(conn, &channel.id)?;
    load(conn, server_id)
}

/// Conversation between the caller and another member of the same server,
/// created on first use.
pub fn open_conversation(
    conn: &Connection,
    caller: &Profile,
    server_id: &Uuid,
    member_id: &Uuid,
) -> ChatResult<Conversation> {
    let own = membership(conn, server_id, caller)?;
    let other = directory::member_by_id(conn, server_id, member_id)?
        .ok_or_else(|| not_found(MEMBER_NOT_FOUND))?;
    if other.id == own.id {
        return Err(bad_request("Cannot message yourself"));
    }
    let id = directory::get_or_create_conversation(conn, &own.id, &other.id)?;
    directory::load_conversation(conn, &id)?
        .ok_or_else(|| ChatError::Internal(anyhow::anyhow!("conversation {id} vanished")))
}
