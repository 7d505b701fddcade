pub mod block;
pub mod chunk;
pub mod coords;
pub mod delayed;
pub mod entity;
pub mod protocol;
