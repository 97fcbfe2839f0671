//! Background services

pub mod scheduler;

pub use scheduler::spawn_rebalance_loop;
