//! Core abstractions shared by the export and import engines.
//!
//! - [`identifier`]: case-insensitive [`ContainerKey`] and identifier validation
//! - [`view`]: [`ViewDefinition`]
//! - [`schema`]: container kind, columns and the append-compatibility check
//! - [`value`]: row values and their JSON encoding
//! - [`filter`]: export-time row filters
//! - [`traits`]: [`ContainerStore`] and [`ArchiveTarget`]

pub mod filter;
pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;
pub mod view;

pub use filter::RowFilter;
pub use identifier::{validate_identifier, ContainerKey};
pub use schema::{Column, ColumnType, ContainerData, ContainerKind, ContainerSchema};
pub use traits::{ArchiveEntry, ArchiveTarget, ContainerStore};
pub use value::{Row, Value};
pub use view::ViewDefinition;
