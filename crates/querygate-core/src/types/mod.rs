//! Value types shared by every data source

pub mod value;

pub use value::{Row, Value};
