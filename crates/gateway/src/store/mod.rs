// External persistence collaborators.
//
// Each store is an enum over a PostgreSQL pool and an in-memory map;
// the memory variant backs the test suites and local experimentation.

pub mod conversations;
pub mod pool;
pub mod users;

pub use conversations::{ConversationStore, MessageSummary, NewMessage, StoredMessage};
pub use users::UserDirectory;
