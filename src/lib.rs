pub mod camera_model;
pub mod error;
pub mod export;
pub mod io;
pub mod reconstruct;
pub mod reprojection;
pub mod triangulate;
pub mod types;
pub mod undistort;
