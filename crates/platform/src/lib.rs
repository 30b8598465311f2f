//! Platform layer: the window, its Vulkan surface and the window events
//! the renderer needs.

mod event;
mod window;

pub use event::SurfaceEvent;
pub use window::{Surface, Window};

pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
