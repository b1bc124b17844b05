pub mod amino;
pub mod mass;
