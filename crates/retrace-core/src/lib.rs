pub mod event;
pub mod migration;
pub mod migrator;
pub mod set;
pub mod store;

pub use event::{Listener, MigrationEvent, SubscriberId};
pub use migration::{Action, Direction, Migration, action, noop};
pub use migrator::MigrateOptions;
pub use set::MigrationSet;
pub use store::{MemoryStore, MigrationRecord, SetState, Store};
