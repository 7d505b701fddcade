pub mod codec;
pub mod compression;
pub mod region;
pub mod tag;
pub mod versioning;
