//! Structures to keep executables running

mod heart;

pub use heart::{DeathReason, Heart, HeartStone};
