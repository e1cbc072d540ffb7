pub mod file_store;
pub mod migrations;
pub mod sqlite_store;

pub use file_store::FileStore;
pub use migrations::{SqlMigration, create_migration_file, discover, load_sql_migrations};
pub use sqlite_store::SqliteStore;
