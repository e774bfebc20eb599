pub mod midi;
pub mod router;
