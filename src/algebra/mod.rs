pub mod element;
pub mod ring;
pub mod tensor;

pub use ring::Ring;
pub use tensor::{Shape, ShapeMismatch, Tensor};
