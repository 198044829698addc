pub mod layers;
pub mod loss;
mod model;
mod sequential;

pub use model::{Model, ParamEntry};
pub use sequential::Sequential;
