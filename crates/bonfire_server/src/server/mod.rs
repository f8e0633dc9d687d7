#![forbid(unsafe_code)]

pub mod admission;
pub mod connection;
pub mod health;
pub mod registry;
pub mod room;

#[cfg(test)]
mod room_tests;
