//! Plane containers shared by every stage.

pub mod bit_mask;
pub mod buffer2;

pub use bit_mask::BitMask2;
pub use buffer2::Buffer2;
