pub mod client;

pub use client::{HistorySource, HttpHistorySource};
