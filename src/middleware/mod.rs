mod body_buffer;

pub use body_buffer::{BufferedBody, MAX_BODY_BYTES, body_buffer_middleware};
