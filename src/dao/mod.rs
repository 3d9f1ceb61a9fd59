/// Database model definitions.
pub mod models;
/// Room snapshot and track catalog storage backends.
pub mod room_store;
/// Storage abstraction layer for database operations.
pub mod storage;
