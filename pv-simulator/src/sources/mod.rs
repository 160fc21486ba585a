pub mod consumption;
pub mod meter;

pub use consumption::{ConsumptionBounds, ConsumptionGenerator};
pub use meter::{timelapse_slots, MeterProducer, TIMELAPSE_SLOTS};
