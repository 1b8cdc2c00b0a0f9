pub mod classes;
pub mod core;
pub mod review;
pub mod setup;
pub mod sheet;
