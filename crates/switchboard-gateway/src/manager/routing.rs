//! Command routing across shards

use super::ShardManager;
use crate::connection::Shard;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{GatewayCommand, Routing};
use std::collections::{BTreeMap, HashSet};
use switchboard_core::Snowflake;

impl ShardManager {
    /// Send `command` to its owners; `preapproved` skips the rate limiter
    pub(super) fn route(
        &self,
        command: &GatewayCommand,
        preapproved: bool,
    ) -> GatewayResult<Vec<Snowflake>> {
        let total = self.shard_count();
        match command.routing() {
            Routing::Entity(entity) => match self.get_shard(entity.shard_index(total)) {
                Some(shard) => {
                    shard.enqueue(command.clone(), preapproved)?;
                    Ok(Vec::new())
                }
                None => Ok(vec![entity]),
            },
            Routing::Broadcast => {
                let mut first_error: Option<GatewayError> = None;
                for shard in self.shards() {
                    if let Err(e) = shard.enqueue(command.clone(), preapproved) {
                        tracing::debug!(shard_id = shard.id(), error = %e, "Broadcast refused");
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(Vec::new()), Err)
            }
            Routing::Batch(entities) => {
                let mut batches: BTreeMap<u32, Vec<Snowflake>> = BTreeMap::new();
                for entity in entities {
                    batches.entry(entity.shard_index(total)).or_default().push(*entity);
                }

                let mut unhandled = Vec::new();
                for (index, batch) in batches {
                    let Some(shard) = self.get_shard(index) else {
                        unhandled.extend(batch);
                        continue;
                    };
                    if let Err(e) = send_batch(&shard, command, &batch, preapproved) {
                        tracing::debug!(shard_id = index, error = %e, "Batch refused");
                        unhandled.extend(batch);
                    }
                }
                Ok(unhandled)
            }
        }
    }
}

fn send_batch(
    shard: &Shard,
    command: &GatewayCommand,
    batch: &[Snowflake],
    preapproved: bool,
) -> GatewayResult<()> {
    shard.enqueue(command.for_entities(batch.to_vec()), preapproved)
}

/// Fold fragments of one split request back together before replaying them
///
/// Member requests that only differ in their guilds are merged when their guild sets are
/// disjoint. Identical broadcasts collapse into one. Order of first appearance is kept.
pub(super) fn merge_commands(commands: Vec<GatewayCommand>) -> Vec<GatewayCommand> {
    let mut merged: Vec<GatewayCommand> = Vec::with_capacity(commands.len());

    for command in commands {
        match command {
            GatewayCommand::RequestGuildMembers(request) => {
                let target = merged.iter_mut().find_map(|existing| match existing {
                    GatewayCommand::RequestGuildMembers(existing)
                        if existing.same_request(&request)
                            && disjoint(&existing.guild_ids, &request.guild_ids) =>
                    {
                        Some(existing)
                    }
                    _ => None,
                });
                match target {
                    Some(existing) => existing.guild_ids.extend(request.guild_ids),
                    None => merged.push(GatewayCommand::RequestGuildMembers(request)),
                }
            }
            GatewayCommand::UpdatePresence(_) => {
                if !merged.contains(&command) {
                    merged.push(command);
                }
            }
            other @ GatewayCommand::UpdateVoiceState(_) => merged.push(other),
        }
    }
    merged
}

fn disjoint(a: &[Snowflake], b: &[Snowflake]) -> bool {
    let a: HashSet<&Snowflake> = a.iter().collect();
    !b.iter().any(|id| a.contains(id))
}
