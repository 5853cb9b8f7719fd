//! Port definitions for external collaborators.

mod image_processor_port;
mod transport_port;

pub use image_processor_port::ImageProcessor;
#[cfg(test)]
pub use transport_port::MockTransport;
pub use transport_port::{FetchRequest, HttpResponse, Transport};
