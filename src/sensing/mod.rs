pub mod controller;
pub mod loop_worker;
pub mod source;

pub use controller::StepService;
pub use loop_worker::{ReadingOutcome, StepPipeline};
pub use source::{parse_reading, pump_lines, SensorEvent, SensorSink};
