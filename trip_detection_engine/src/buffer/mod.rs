mod motion_buffer;
mod fix_buffer;

pub use motion_buffer::MotionBuffer;
pub use fix_buffer::{FixBuffer, FixInsert};
