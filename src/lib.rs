pub mod config;
pub mod draw;
pub mod engine;
pub mod error;
pub mod identity;
pub mod state;
pub mod store;
pub mod validate;

pub use config::{Configuration, GridKindInfo, Limits};
pub use draw::Draw;
pub use engine::{Engine, GridSettings};
pub use error::{Error, Result, ValidationErrors};
pub use identity::{Actor, Identity};
pub use state::SquareState;
pub use store::{
    Annotation, Grid, GridKind, MemStore, Page, Paged, PgStore, Pool, Square, SquareLog, Store,
};
