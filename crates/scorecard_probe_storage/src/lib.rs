#![forbid(unsafe_code)]

pub mod clickhouse;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod repo;

pub use error::{with_deadline, StoreError};
pub use repo::{ColStoreRepo, RelStoreRepo};
