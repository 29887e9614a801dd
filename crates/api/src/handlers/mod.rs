pub mod cancellations;
pub mod stream;
