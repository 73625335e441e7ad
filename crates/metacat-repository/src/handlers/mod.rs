//! Handlers of the built-in types with behavior beyond [`DefaultHandler`](crate::handler::DefaultHandler)

mod glossary_term;
mod table;
mod tag;
mod team;

pub use glossary_term::{GlossaryTermHandler, SYNONYMS};
pub use table::{columns, Column, TableHandler, COLUMNS};
pub use tag::TagHandler;
pub use team::{TeamHandler, TeamType, TEAM_TYPE};
