//! Gap-free local order-book reconstruction (C3).

pub mod book;

pub use book::{LocalOrderBook, PendingCheck};
