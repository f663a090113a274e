mod assemble;
mod classify;
mod extract;

pub use assemble::{collect_buffered, finalize_response, fragment_stream};
pub use classify::{AgentEvent, classify};
pub use extract::{DEFAULT_MAX_DEPTH, extract_bytes, extract_text, strip_json_fence};
