pub mod backend;
pub mod connection;
pub mod memory;
pub mod migrations;
pub mod sheets;
pub mod sqlite;

pub use backend::{open_ledger, LedgerSetupError};
pub use connection::{connect, connect_with_settings, DbPool};
pub use memory::InMemoryOrderLedger;
pub use sheets::{GoogleSheetsLedger, ServiceAccountKey, SheetsEndpoints, SpreadsheetLocator};
pub use sqlite::SqlOrderLedger;
