//! SeaORM entity definitions for PostgreSQL database.

pub mod import_stat;
