#![forbid(unsafe_code)]

mod command;
mod frame;
mod parse;

pub use command::{Command, Expiry};
pub use frame::Frame;
pub use parse::Parse;
