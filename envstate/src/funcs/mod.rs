pub mod forecast;
pub mod gibbs;
mod input;
pub mod interpolate;

pub use forecast::*;
pub use gibbs::*;
pub use interpolate::*;
