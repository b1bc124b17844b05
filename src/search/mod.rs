pub mod cache;
pub mod engine;
pub mod mapping;
pub mod mass_tables;
pub mod modification;
pub mod tag;
