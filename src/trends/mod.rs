pub mod analysis;
pub mod parsing;
