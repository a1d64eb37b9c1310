pub mod flow_field;
pub mod io;
pub mod pixel_buffer;
pub mod plane;

pub use flow_field::FlowField;
pub use pixel_buffer::{PixelBuffer, SampleFormat, Samples};
pub use plane::Plane;
