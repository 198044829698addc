mod conv2d;
mod dense;
mod dropout;
mod flatten;
mod layer;
mod log_softmax;
mod max_pool;
mod relu;

pub use conv2d::Conv2d;
pub use dense::Dense;
pub use dropout::{Dropout, Dropout2d};
pub use flatten::Flatten;
pub use layer::Layer;
pub use log_softmax::{LogSoftmax, log_softmax};
pub use max_pool::MaxPool2d;
pub use relu::Relu;
