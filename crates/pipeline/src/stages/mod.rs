//! Built-in analysis transforms, grouped by shape of computation

pub mod arithmetic;
pub mod generate;
pub mod reduce;
pub mod series;
