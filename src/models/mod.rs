pub mod bep3;
pub mod common;
pub mod message;
pub mod peer;
pub mod swarm;
