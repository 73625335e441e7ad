//! Entity commands

use std::io::Read;

use anyhow::Context;
use clap::{Args, Subcommand};
use metacat_core::{Entity, EntityId, EntityVersion, Fields, Include, ListFilter};
use metacat_repository::DeleteOptions;
use serde_json::Value;

use crate::output::{format_entities, format_entity, format_page, to_json};
use crate::{AppContext, Cli};

#[derive(Args)]
pub struct EntityArgs {
    #[command(subcommand)]
    pub command: EntityCommands,
}

#[derive(Subcommand)]
pub enum EntityCommands {
    /// Create a new entity
    Create {
        /// Entity type, e.g. table or glossaryTerm
        r#type: String,
        /// JSON body: inline, @file or - for stdin
        body: String,
        /// Container as TYPE:FQN
        #[arg(short, long)]
        parent: Option<String>,
    },
    /// Create an entity or update the one with the same name
    Put {
        r#type: String,
        /// JSON body: inline, @file or - for stdin
        body: String,
        /// Container as TYPE:FQN
        #[arg(short, long)]
        parent: Option<String>,
    },
    /// Get an entity by id
    Get {
        r#type: String,
        id: String,
        /// Comma separated fields to include, * for all
        #[arg(long, default_value = "*")]
        fields: String,
        /// all, non-deleted or deleted
        #[arg(long, default_value = "non-deleted")]
        include: String,
        /// Bypass the cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Get an entity by fully qualified name
    GetByName {
        r#type: String,
        fqn: String,
        #[arg(long, default_value = "*")]
        fields: String,
        #[arg(long, default_value = "non-deleted")]
        include: String,
        #[arg(long)]
        no_cache: bool,
    },
    /// Apply a JSON merge patch
    Patch {
        r#type: String,
        id: String,
        /// JSON patch: inline, @file or - for stdin
        patch: String,
    },
    /// Delete an entity by id, or by name with --by-name
    Delete {
        r#type: String,
        /// Id, or fully qualified name with --by-name
        key: String,
        /// Treat the key as a fully qualified name
        #[arg(long)]
        by_name: bool,
        /// Delete children too
        #[arg(short, long)]
        recursive: bool,
        /// Purge instead of soft delete
        #[arg(long)]
        hard: bool,
    },
    /// Restore a soft deleted entity
    Restore { r#type: String, id: String },
    /// Add a user to the followers of an entity
    Follow {
        r#type: String,
        id: String,
        /// Id of the following user
        user_id: String,
    },
    /// Remove a user from the followers of an entity
    Unfollow {
        r#type: String,
        id: String,
        user_id: String,
    },
    /// List entities in name order
    List {
        r#type: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Cursor of the next page
        #[arg(long, conflicts_with = "before")]
        after: Option<String>,
        /// Cursor of the previous page
        #[arg(long)]
        before: Option<String>,
        /// Only entities below this fully qualified name
        #[arg(long)]
        parent: Option<String>,
        #[arg(long, default_value = "non-deleted")]
        include: String,
        #[arg(long, default_value = "")]
        fields: String,
    },
    /// Show the version history of an entity
    Versions { r#type: String, id: String },
    /// Show one version of an entity
    Version {
        r#type: String,
        id: String,
        version: EntityVersion,
    },
}

pub async fn run(args: &EntityArgs, cli: &Cli, ctx: &AppContext) -> anyhow::Result<()> {
    let repo = &ctx.repo;
    let actor = cli.user.as_str();

    let output = match &args.command {
        EntityCommands::Create { r#type, body, parent } => {
            let entity = entity_body(ctx, r#type, body, parent.as_deref()).await?;
            let created = repo.create(entity, actor).await?;
            tracing::info!("Created {} {}", r#type, created.fully_qualified_name);
            format_entity(&created, cli.format)?
        }
        EntityCommands::Put { r#type, body, parent } => {
            let entity = entity_body(ctx, r#type, body, parent.as_deref()).await?;
            let response = repo.create_or_update(entity, actor).await?;
            tracing::info!(event = ?response.event_type, fqn = %response.entity.fully_qualified_name, "Put entity");
            to_json(&response)?
        }
        EntityCommands::Get {
            r#type,
            id,
            fields,
            include,
            no_cache,
        } => {
            let entity = repo
                .get(r#type, &parse_id(id)?, &Fields::parse(fields)?, include.parse()?, !no_cache)
                .await?;
            format_entity(&entity, cli.format)?
        }
        EntityCommands::GetByName {
            r#type,
            fqn,
            fields,
            include,
            no_cache,
        } => {
            let entity = repo
                .get_by_name(r#type, fqn, &Fields::parse(fields)?, include.parse()?, !no_cache)
                .await?;
            format_entity(&entity, cli.format)?
        }
        EntityCommands::Patch { r#type, id, patch } => {
            let patch = read_json(patch)?;
            let response = repo.patch(r#type, &parse_id(id)?, &patch, actor).await?;
            to_json(&response)?
        }
        EntityCommands::Delete {
            r#type,
            key,
            by_name,
            recursive,
            hard,
        } => {
            let options = DeleteOptions {
                recursive: *recursive,
                hard: *hard,
            };
            let response = if *by_name {
                repo.delete_by_name(r#type, key, actor, options).await?
            } else {
                repo.delete(r#type, &parse_id(key)?, actor, options).await?
            };
            to_json(&response)?
        }
        EntityCommands::Restore { r#type, id } => {
            let response = repo.restore(r#type, &parse_id(id)?, actor).await?;
            to_json(&response)?
        }
        EntityCommands::Follow { r#type, id, user_id } => {
            let response = repo
                .add_follower(r#type, &parse_id(id)?, &parse_id(user_id)?, actor)
                .await?;
            to_json(&response)?
        }
        EntityCommands::Unfollow { r#type, id, user_id } => {
            let response = repo
                .delete_follower(r#type, &parse_id(id)?, &parse_id(user_id)?, actor)
                .await?;
            to_json(&response)?
        }
        EntityCommands::List {
            r#type,
            limit,
            after,
            before,
            parent,
            include,
            fields,
        } => {
            let include: Include = include.parse()?;
            let mut filter = ListFilter::new(include);
            if let Some(parent) = parent {
                filter = filter.with_parent(parent.as_str());
            }
            let fields = Fields::parse(fields)?;
            let page = match before {
                Some(before) => repo.list_before(r#type, &filter, &fields, *limit, before.clone())?,
                None => repo.list_after(r#type, &filter, &fields, *limit, after.clone())?,
            };
            format_page(&page, cli.format)?
        }
        EntityCommands::Versions { r#type, id } => {
            let history = repo.list_versions(r#type, &parse_id(id)?)?;
            match cli.format {
                crate::output::OutputFormat::Json => to_json(&history)?,
                format => format_entities(&history.versions, format)?,
            }
        }
        EntityCommands::Version { r#type, id, version } => {
            let entity = repo.get_version(r#type, &parse_id(id)?, *version)?;
            format_entity(&entity, cli.format)?
        }
    };

    if !cli.quiet {
        println!("{}", output);
    }
    Ok(())
}

fn parse_id(id: &str) -> anyhow::Result<EntityId> {
    Ok(id.parse()?)
}

/// Read a JSON argument: inline text, `@path` or `-` for stdin
fn read_json(arg: &str) -> anyhow::Result<Value> {
    let text = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else if let Some(path) = arg.strip_prefix('@') {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?
    } else {
        arg.to_string()
    };
    serde_json::from_str(&text).context("Invalid JSON")
}

/// Build the entity of a create or put from its JSON body
async fn entity_body(
    ctx: &AppContext,
    entity_type: &str,
    body: &str,
    parent: Option<&str>,
) -> anyhow::Result<Entity> {
    let mut value = read_json(body)?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("Entity body must be a JSON object"))?;
    match object.get("entityType").and_then(Value::as_str) {
        Some(given) if given != entity_type => {
            anyhow::bail!("Body has entityType {} but {} was requested", given, entity_type)
        }
        Some(_) => {}
        None => {
            object.insert("entityType".into(), Value::String(entity_type.to_string()));
        }
    }
    let mut entity: Entity = serde_json::from_value(value).context("Invalid entity body")?;

    if let Some(parent) = parent {
        let (parent_type, parent_fqn) = parent
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Parent must be TYPE:FQN, got {}", parent))?;
        let container = ctx
            .repo
            .get_by_name(parent_type, parent_fqn, &Fields::none(), Include::NonDeleted, true)
            .await?;
        entity.parent = Some(container.to_reference());
    }
    Ok(entity)
}
