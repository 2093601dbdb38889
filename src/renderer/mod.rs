//! The two renderer thread delegates and the frame composition state.

mod backend;
mod frontend;
mod render_group;

pub use backend::BackendRenderer;
pub use frontend::{FrontendRenderer, Listeners, TapEventInfo};
pub use render_group::{draw_order, RenderGroup};
