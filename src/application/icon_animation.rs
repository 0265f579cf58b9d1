use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use tracing::debug;

use crate::browser::Toolbar;
use crate::icon::{self, FRAME_COUNT};

pub const FRAME_PERIOD: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnimationState {
    pub frame_index: usize,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnimationEffect {
    StartTimer { period: Duration },
    StopTimer,
    RenderFrame(usize),
    RestoreStatic,
}

/// `any_active` is the hub's "some record is downloading" flag.
pub fn should_animate(any_active: bool, global_paused: bool, connected: bool) -> bool {
    connected && !global_paused && any_active
}

#[derive(Debug, Default)]
pub struct IconAnimator {
    state: AnimationState,
}

impl IconAnimator {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn state(&self) -> AnimationState {
        self.state
    }

    /// Only edges produce effects; re-evaluating with the same outcome is a no-op.
    pub fn evaluate(
        &mut self,
        any_active: bool,
        global_paused: bool,
        connected: bool,
    ) -> Vec<AnimationEffect> {
        let wanted = should_animate(any_active, global_paused, connected);
        match (self.state.running, wanted) {
            (false, true) => {
                debug!("icon animation started");
                self.state = AnimationState {
                    frame_index: 0,
                    running: true,
                };
                vec![
                    AnimationEffect::StartTimer {
                        period: FRAME_PERIOD,
                    },
                    AnimationEffect::RenderFrame(0),
                ]
            }
            (true, false) => {
                debug!("icon animation stopped");
                self.state = AnimationState::default();
                vec![AnimationEffect::StopTimer, AnimationEffect::RestoreStatic]
            }
            _ => Vec::new(),
        }
    }

    /// Advances one frame. `None` when a late tick arrives after stopping.
    pub fn tick(&mut self) -> Option<usize> {
        if !self.state.running {
            return None;
        }
        self.state.frame_index = (self.state.frame_index + 1) % FRAME_COUNT;
        Some(self.state.frame_index)
    }
}

/// Renders frames onto the toolbar button.
pub struct IconPainter {
    base: Option<RgbaImage>,
    toolbar: Arc<dyn Toolbar>,
}

impl IconPainter {
    pub fn new(base: Option<RgbaImage>, toolbar: Arc<dyn Toolbar>) -> Self {
        Self { base, toolbar }
    }

    pub fn paint_frame(&self, frame_index: usize) {
        let frame = icon::render_frame(self.base.as_ref(), frame_index);
        self.toolbar.set_icon(&frame.into());
    }

    pub fn paint_static(&self) {
        let image = icon::render_static(self.base.as_ref());
        self.toolbar.set_icon(&image.into());
    }
}
