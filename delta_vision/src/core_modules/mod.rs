pub mod artifacts;
pub mod canvas;
pub mod change_regions;
pub mod pixel;
pub mod pixel_delta;
pub mod session;
pub mod structural;
pub mod text_delta;
