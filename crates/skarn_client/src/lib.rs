pub mod mesh_worker;
pub mod mesher;
pub mod render;
pub mod store;
pub mod terrain;
pub mod visibility;
pub mod window;
