//! Persistence boundary. Durable storage lives behind `TransactionRepository`.

pub mod transaction_repository;

pub use transaction_repository::{
    InMemoryTransactionRepository, Transaction, TransactionKind, TransactionRepository,
};
