pub mod bounding_box;
pub mod math_helper;
pub mod thread_dispatcher;
