//! Window events the renderer reacts to.

use winit::event::WindowEvent;

/// A change in the presentation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// New drawable size in physical pixels, possibly zero (minimized).
    Resized { width: u32, height: u32 },
    CloseRequested,
}

impl SurfaceEvent {
    /// Maps a winit window event, ignoring everything the renderer does not
    /// care about.
    pub fn from_window_event(event: &WindowEvent) -> Option<Self> {
        match event {
            WindowEvent::Resized(size) => Some(SurfaceEvent::Resized {
                width: size.width,
                height: size.height,
            }),
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                Some(SurfaceEvent::CloseRequested)
            }
            _ => None,
        }
    }
}
