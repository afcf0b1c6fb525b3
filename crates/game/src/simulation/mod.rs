mod tick;

pub use tick::{FixedTimestep, GameClock};
