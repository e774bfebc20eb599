pub mod constants;
pub mod framer;
