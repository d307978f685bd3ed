pub mod constraint;
pub mod error;
pub mod geometry;
pub mod parametric;
pub mod precision;
pub mod session;
pub mod store;
pub mod units;

pub fn version() -> &'static str {
    "0.1.0"
}
