pub mod goal;
pub mod steps;

pub use goal::Goal;
pub use steps::{DailySteps, StepTotals};
