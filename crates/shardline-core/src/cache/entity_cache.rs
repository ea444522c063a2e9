//! In-memory entity cache
//!
//! Default [`EntityBuilder`]: keeps the latest known guilds, users and members
//! in concurrent maps shared by every shard of a client.

use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::entities::{Guild, GuildMember, User};
use crate::error::BuildError;
use crate::events::Event;
use crate::traits::EntityBuilder;
use crate::value_objects::{ShardInfo, Snowflake};

/// Concurrent cache of everything the gateway has told us about
#[derive(Default)]
pub struct EntityCache {
    self_user: RwLock<Option<Arc<User>>>,
    users: DashMap<Snowflake, Arc<User>>,
    guilds: DashMap<Snowflake, Arc<Guild>>,
    members: DashMap<(Snowflake, Snowflake), Arc<GuildMember>>,
    /// Guilds last seen unavailable; their next create is an availability
    /// change rather than a join
    outages: DashSet<Snowflake>,
}

impl EntityCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The current user, once the startup payload was processed
    pub fn self_user(&self) -> Option<Arc<User>> {
        self.self_user.read().clone()
    }

    /// Look up a guild
    pub fn guild(&self, id: Snowflake) -> Option<Arc<Guild>> {
        self.guilds.get(&id).map(|g| Arc::clone(g.value()))
    }

    /// Look up a user
    pub fn user(&self, id: Snowflake) -> Option<Arc<User>> {
        self.users.get(&id).map(|u| Arc::clone(u.value()))
    }

    /// Look up a member of a guild
    pub fn member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Arc<GuildMember>> {
        self.members
            .get(&(guild_id, user_id))
            .map(|m| Arc::clone(m.value()))
    }

    /// Number of cached guilds, available or not
    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    /// Number of cached members of one guild
    pub fn member_count(&self, guild_id: Snowflake) -> usize {
        self.members.iter().filter(|m| m.key().0 == guild_id).count()
    }

    fn cache_user(&self, user: User) -> Arc<User> {
        Arc::clone(
            self.users
                .entry(user.id)
                .or_insert_with(|| Arc::new(user))
                .value(),
        )
    }

    fn cache_member(&self, guild_id: Snowflake, mut member: GuildMember) -> Arc<GuildMember> {
        member.guild_id = guild_id;
        let user = self.cache_user(member.user.clone());
        member.user = (*user).clone();
        Arc::clone(
            self.members
                .entry((guild_id, member.user.id))
                .or_insert_with(|| Arc::new(member))
                .value(),
        )
    }

    fn replace_guild(&self, guild: Guild) -> Arc<Guild> {
        let guild = Arc::new(guild);
        self.guilds.insert(guild.id, Arc::clone(&guild));
        guild
    }

    fn remove_guild(&self, guild_id: Snowflake) {
        self.guilds.remove(&guild_id);
        self.members.retain(|(g, _), _| *g != guild_id);
        self.outages.remove(&guild_id);
    }

    fn mark_unavailable(&self, guild_id: Snowflake) {
        self.outages.insert(guild_id);
        let placeholder = match self.guilds.get(&guild_id) {
            Some(existing) => Guild {
                unavailable: true,
                ..(**existing).clone()
            },
            None => Guild::unavailable(guild_id),
        };
        self.replace_guild(placeholder);
    }

    fn on_guild_create(&self, shard: ShardInfo, raw: &Value) -> Result<Option<Event>, BuildError> {
        let guild = self.build_guild(raw)?;
        if guild.unavailable {
            return Ok(Some(Event::GuildUnavailable {
                shard,
                guild_id: guild.id,
            }));
        }
        if let Some(members) = raw.get("members").and_then(Value::as_array) {
            for member in members {
                self.cache_member(guild.id, parse("member", member)?);
            }
        }
        if self.outages.remove(&guild.id).is_some() {
            Ok(Some(Event::GuildAvailable { shard, guild }))
        } else {
            Ok(Some(Event::GuildJoin { shard, guild }))
        }
    }

    fn on_guild_delete(&self, shard: ShardInfo, raw: &Value) -> Result<Option<Event>, BuildError> {
        let guild_id = id_of(raw, "guild", "id")?;
        if raw.get("unavailable").and_then(Value::as_bool) == Some(true) {
            self.mark_unavailable(guild_id);
            Ok(Some(Event::GuildUnavailable { shard, guild_id }))
        } else {
            self.remove_guild(guild_id);
            Ok(Some(Event::GuildLeave { shard, guild_id }))
        }
    }

    fn on_member_add(&self, shard: ShardInfo, raw: &Value) -> Result<Option<Event>, BuildError> {
        let guild_id = id_of(raw, "member", "guild_id")?;
        let member = self.cache_member(guild_id, parse("member", raw)?);
        Ok(Some(Event::MemberJoin { shard, member }))
    }

    fn on_member_remove(&self, shard: ShardInfo, raw: &Value) -> Result<Option<Event>, BuildError> {
        let guild_id = id_of(raw, "member", "guild_id")?;
        let user: User = parse(
            "user",
            raw.get("user").ok_or(BuildError::missing("member", "user"))?,
        )?;
        self.members.remove(&(guild_id, user.id));
        let user = self.cache_user(user);
        Ok(Some(Event::MemberLeave {
            shard,
            guild_id,
            user,
        }))
    }
}

impl EntityBuilder for EntityCache {
    fn build_self_user(&self, raw: &Value) -> Result<Arc<User>, BuildError> {
        let user: User = parse("user", raw)?;
        let mut slot = self.self_user.write();
        if let Some(existing) = slot.as_ref().filter(|u| u.id == user.id) {
            return Ok(Arc::clone(existing));
        }
        let user = Arc::new(user);
        self.users.insert(user.id, Arc::clone(&user));
        *slot = Some(Arc::clone(&user));
        Ok(user)
    }

    fn build_guild(&self, raw: &Value) -> Result<Arc<Guild>, BuildError> {
        let guild: Guild = parse("guild", raw)?;
        if guild.unavailable {
            self.outages.insert(guild.id);
        }
        let cached = self.guild(guild.id);
        match cached {
            // An available payload replaces an unavailable placeholder
            Some(existing) if !(existing.unavailable && !guild.unavailable) => Ok(existing),
            _ => Ok(self.replace_guild(guild)),
        }
    }

    fn build_members(
        &self,
        guild_id: Snowflake,
        raw: &[Value],
    ) -> Result<Vec<Arc<GuildMember>>, BuildError> {
        raw.iter()
            .map(|m| Ok(self.cache_member(guild_id, parse("member", m)?)))
            .collect()
    }

    fn build_event(
        &self,
        shard: ShardInfo,
        kind: &str,
        sequence: Option<u64>,
        raw: &Value,
    ) -> Result<Option<Event>, BuildError> {
        match kind {
            "GUILD_CREATE" => self.on_guild_create(shard, raw),
            "GUILD_DELETE" => self.on_guild_delete(shard, raw),
            "GUILD_MEMBER_ADD" => self.on_member_add(shard, raw),
            "GUILD_MEMBER_REMOVE" => self.on_member_remove(shard, raw),
            _ => {
                match kind {
                    "GUILD_UPDATE" => {
                        self.replace_guild(parse("guild", raw)?);
                    }
                    "USER_UPDATE" => {
                        let user = Arc::new(parse::<User>("user", raw)?);
                        self.users.insert(user.id, Arc::clone(&user));
                        *self.self_user.write() = Some(user);
                    }
                    _ => {}
                }
                Ok(Some(Event::Dispatch {
                    shard,
                    kind: kind.to_string(),
                    sequence,
                    data: raw.clone(),
                }))
            }
        }
    }

    fn invalidate(&self, shard: ShardInfo) {
        let owned = |id: &Snowflake| shard.owns(*id);
        self.guilds.retain(|id, _| !owned(id));
        self.members.retain(|(g, _), _| !owned(g));
        self.outages.retain(|id| !owned(id));
        tracing::debug!(shard = %shard, "Entity cache invalidated for shard");
    }
}

impl std::fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("guilds", &self.guilds.len())
            .field("users", &self.users.len())
            .field("members", &self.members.len())
            .finish()
    }
}

fn parse<T: DeserializeOwned>(kind: &'static str, raw: &Value) -> Result<T, BuildError> {
    T::deserialize(raw).map_err(|source| BuildError::InvalidPayload { kind, source })
}

fn id_of(raw: &Value, kind: &'static str, field: &'static str) -> Result<Snowflake, BuildError> {
    raw.get(field)
        .and_then(Snowflake::from_value)
        .ok_or(BuildError::missing(kind, field))
}
