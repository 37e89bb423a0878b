mod pattern;

pub use pattern::*;
