pub const DEFAULT_POSITION: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragPhase {
    Idle,
    Dragging,
}

/// Before/after slider. The overlay (edited) image is clipped against the
/// base (original) image at `position` percent from the left.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareSlider {
    active: bool,
    position: f64,
    phase: DragPhase,
}

impl Default for CompareSlider {
    fn default() -> Self {
        Self {
            active: false,
            position: DEFAULT_POSITION,
            phase: DragPhase::Idle,
        }
    }
}

impl CompareSlider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn phase(&self) -> DragPhase {
        self.phase
    }

    pub fn is_dragging(&self) -> bool {
        self.phase == DragPhase::Dragging
    }

    /// Activation always recentres the handle.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        self.phase = DragPhase::Idle;
        if active {
            self.position = DEFAULT_POSITION;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Pointer (mouse or touch) pressed on the handle.
    pub fn pointer_down(&mut self) {
        if self.active {
            self.phase = DragPhase::Dragging;
        }
    }

    /// Pointer moved anywhere in the window. Returns the new position when
    /// a drag is in progress.
    pub fn pointer_move(
        &mut self,
        pointer_x: f64,
        container_left: f64,
        container_width: f64,
    ) -> Option<f64> {
        if self.phase != DragPhase::Dragging {
            return None;
        }
        let position = position_from_pointer(pointer_x, container_left, container_width)?;
        self.position = position;
        Some(position)
    }

    /// Pointer released anywhere; not required to be over the handle.
    pub fn pointer_up(&mut self) {
        self.phase = DragPhase::Idle;
    }

    /// Jumps the handle directly, e.g. from a keyboard or CLI command.
    pub fn set_position(&mut self, percent: f64) {
        if percent.is_finite() {
            self.position = percent.clamp(0.0, 100.0);
        }
    }

    /// Right-hand inset of the overlay clip, in percent.
    pub fn clip_inset(&self) -> f64 {
        100.0 - self.position
    }
}

pub fn position_from_pointer(
    pointer_x: f64,
    container_left: f64,
    container_width: f64,
) -> Option<f64> {
    if !container_width.is_finite() || container_width <= 0.0 || !pointer_x.is_finite() {
        return None;
    }
    let raw = (pointer_x - container_left) / container_width * 100.0;
    Some(raw.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dragging() -> CompareSlider {
        let mut slider = CompareSlider::new();
        slider.set_active(true);
        slider.pointer_down();
        slider
    }

    #[test]
    fn drag_tracks_pointer_as_percentage() {
        let mut slider = dragging();
        assert_eq!(slider.pointer_move(150.0, 100.0, 200.0), Some(25.0));
        assert_eq!(slider.position(), 25.0);
        assert_eq!(slider.clip_inset(), 75.0);
    }

    #[test]
    fn pointer_outside_container_clamps_to_edges() {
        let mut slider = dragging();
        assert_eq!(slider.pointer_move(-500.0, 100.0, 200.0), Some(0.0));
        assert_eq!(slider.pointer_move(10_000.0, 100.0, 200.0), Some(100.0));
        assert_eq!(slider.position(), 100.0);
    }

    #[test]
    fn moves_while_idle_are_ignored() {
        let mut slider = CompareSlider::new();
        slider.set_active(true);
        assert_eq!(slider.pointer_move(120.0, 100.0, 200.0), None);
        assert_eq!(slider.position(), DEFAULT_POSITION);
    }

    #[test]
    fn pointer_up_ends_drag() {
        let mut slider = dragging();
        slider.pointer_up();
        assert_eq!(slider.phase(), DragPhase::Idle);
        assert_eq!(slider.pointer_move(120.0, 100.0, 200.0), None);
    }

    #[test]
    fn zero_width_keeps_previous_position() {
        let mut slider = dragging();
        slider.pointer_move(150.0, 100.0, 200.0);
        assert_eq!(slider.pointer_move(150.0, 100.0, 0.0), None);
        assert_eq!(slider.position(), 25.0);
    }

    #[test]
    fn activation_recentres_handle() {
        let mut slider = dragging();
        slider.pointer_move(110.0, 100.0, 200.0);
        slider.set_active(false);
        slider.set_active(true);
        assert_eq!(slider.position(), DEFAULT_POSITION);
        assert!(!slider.is_dragging());
    }

    #[test]
    fn inactive_slider_does_not_start_drag() {
        let mut slider = CompareSlider::new();
        slider.pointer_down();
        assert!(!slider.is_dragging());
    }
}
