pub mod map;
pub mod source;
pub mod time;
