//! # Repository Implementations
//!
//! One repository per aggregate. Each holds a clone of the pool.
//!
//! Functions that must join a caller's transaction take
//! `&mut SqliteConnection` and are `pub(crate)`; checkout, status changes
//! and transfer decisions compose them inside one [`begin_write`].
//!
//! ## Write Transactions
//! Every transaction here writes and starts with `BEGIN IMMEDIATE`. The
//! write lock is held from the first statement: concurrent writers queue
//! on the busy timeout and reads inside the transaction see the latest
//! commit.

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::DbResult;

pub mod cart;
pub mod catalog;
pub mod coupon;
pub mod notification;
pub mod order;
pub mod stock;
pub mod support;
pub mod transfer;

/// Opens a transaction holding the database write lock.
pub(crate) async fn begin_write(pool: &SqlitePool) -> DbResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}
