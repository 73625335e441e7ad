//! Output formatting utilities

use clap::ValueEnum;
use metacat_core::{Entity, ResultList};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Pretty printed JSON
    #[default]
    Json,
    /// One entity per line
    Table,
}

/// Format any value as pretty JSON
pub fn to_json<T: Serialize>(data: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(data)?)
}

pub fn format_entity(entity: &Entity, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => to_json(entity),
        OutputFormat::Table => Ok(format!("{}{}", header(), row(entity))),
    }
}

pub fn format_entities(entities: &[Entity], format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => to_json(&entities),
        OutputFormat::Table => Ok(table(entities)),
    }
}

pub fn format_page(page: &ResultList<Entity>, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => to_json(page),
        OutputFormat::Table => {
            let mut out = table(&page.data);
            out.push_str(&format!("\n{} of {}", page.data.len(), page.paging.total));
            if let Some(before) = &page.paging.before {
                out.push_str(&format!("  before: {}", before));
            }
            if let Some(after) = &page.paging.after {
                out.push_str(&format!("  after: {}", after));
            }
            Ok(out)
        }
    }
}

fn header() -> String {
    format!("{:<26}  {:<16}  {:<7}  {:<7}  {}\n", "ID", "TYPE", "VERSION", "DELETED", "FQN")
}

fn row(entity: &Entity) -> String {
    format!(
        "{:<26}  {:<16}  {:<7}  {:<7}  {}\n",
        entity.id, entity.entity_type, entity.version, entity.deleted, entity.fully_qualified_name
    )
}

fn table(entities: &[Entity]) -> String {
    let mut out = header();
    for entity in entities {
        out.push_str(&row(entity));
    }
    out
}
