#![forbid(unsafe_code)]

mod blocking;
mod db;
mod entry;

pub use db::Db;
pub use entry::{Entry, KeyType, Value};
