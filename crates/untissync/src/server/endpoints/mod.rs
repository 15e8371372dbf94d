pub mod schools;
pub mod status;
pub mod sync;
