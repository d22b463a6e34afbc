#![doc = include_str!("../README.md")]

mod coordinator;
mod error;
mod generator;
mod rand;
mod segment;
mod snowflake;
mod status;
mod time;

pub use crate::coordinator::*;
pub use crate::error::*;
pub use crate::generator::*;
pub use crate::rand::*;
pub use crate::segment::*;
pub use crate::snowflake::*;
pub use crate::status::*;
pub use crate::time::*;
