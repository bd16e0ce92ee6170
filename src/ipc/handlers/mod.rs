pub mod admin;
pub mod class;
pub mod core;
pub mod faculty;
pub mod students;
pub mod subjects;
pub mod submissions;
pub mod views;
