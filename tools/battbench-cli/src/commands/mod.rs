pub mod monitor;
pub mod play;
pub mod record;
pub mod tests;
