pub mod books;
pub mod core;
pub mod courses;
pub mod decision;
pub mod enrollment;
pub mod sales;
pub mod tables;
