pub mod cursor;
pub mod error;
pub mod history;
pub mod inbox;
pub mod outbox;
pub mod schema;
pub mod store;
pub mod summary;

pub use cursor::CursorStore;
pub use error::{Result, StoreError};
pub use history::{HistoryStore, NewTurn};
pub use inbox::{EnqueueResult, InboxQueue};
pub use outbox::OutboxQueue;
pub use store::Store;
pub use summary::SummaryStore;
