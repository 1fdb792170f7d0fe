mod book;

pub use book::{DepthBook, DepthStatus};
