//! Station Energy Management System core
//!
//! Configuration, session bookkeeping and the allocation engine that shares
//! the grid capacity of a charging station between its active sessions.

mod allocator;
mod config;
mod error;
mod models;
mod registry;

pub use crate::allocator::{
    Allocation, AllocationEngine, GridPolicy, max_min_fair_share, sum_kilowatts, to_kilowatts,
    to_watts,
};
pub use crate::error::*;
pub use crate::models::*;
pub use crate::registry::SessionRegistry;
