pub mod time;

pub use time::{center_time, Duration, TimePoint, Timer};
