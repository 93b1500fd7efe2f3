mod canvas;
mod compositor;
mod mask;

pub use canvas::Canvas;
pub use compositor::draw_mask;
pub use mask::{to_mask, MaskStyle};
