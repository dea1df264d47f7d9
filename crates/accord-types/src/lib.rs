pub mod api;
pub mod events;
pub mod models;
pub mod outcome;

pub use models::{Fid, PairKey};
pub use outcome::Outcome;
