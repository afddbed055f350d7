pub mod error;
pub mod rate_limit;
pub mod text;
