pub mod order;
pub mod session;

pub use order::{OrderRecord, OrderStatus, Sender, UserId};
pub use session::{Session, SessionId, SessionStep};
