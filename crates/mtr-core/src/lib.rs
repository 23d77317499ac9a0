pub mod push;
pub mod wire;
