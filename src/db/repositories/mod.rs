pub mod goals;
pub mod steps;
