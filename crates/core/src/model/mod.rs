pub mod record;
pub mod span;
