//!
//! Chemistry model implementations
//!
//! One module per chemistry; adding a chemistry is one new module plus one
//! registry entry in `model`.
//!
pub mod s_p1_c1v2;
