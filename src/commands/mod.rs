pub mod speech;
pub mod story;
pub mod vocab;
