//! Archive traversal and year grouping.

pub mod builder;
