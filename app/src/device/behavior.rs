use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How a physical switch on a device maps onto scenes.
#[derive(Debug)]
pub enum SwitchBehavior {
    Toggle(ToggleSwitch),
    OneButton(OneButtonSwitch),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleSwitch {
    pub on_scene: String,
    pub off_scene: String,
}

impl ToggleSwitch {
    pub fn scene_for(&self, on: bool) -> &str {
        if on { &self.on_scene } else { &self.off_scene }
    }
}

/// Cycles through a list of scenes with repeated presses of a single button.
#[derive(Debug)]
pub struct OneButtonSwitch {
    scene_list: Vec<String>,
    off_scene: String,
    selection_timeout: Duration,
    state: Mutex<SelectionState>,
}

impl OneButtonSwitch {
    pub fn new(scene_list: Vec<String>, off_scene: String, selection_timeout: Duration) -> Self {
        Self {
            scene_list,
            off_scene,
            selection_timeout,
            state: Mutex::new(SelectionState::default()),
        }
    }

    pub fn scene_list(&self) -> &[String] {
        &self.scene_list
    }

    pub fn selection_timeout(&self) -> Duration {
        self.selection_timeout
    }

    /// Scene for a selection, the off scene for none.
    pub fn scene_for(&self, selected: Option<usize>) -> &str {
        selected
            .and_then(|i| self.scene_list.get(i))
            .unwrap_or(&self.off_scene)
    }

    pub fn state(&self) -> MutexGuard<'_, SelectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Press {
    /// Notification caused by our own corrective write.
    Echo,
    Unchanged,
    Selected(Option<usize>),
}

#[derive(Debug, Default)]
pub struct SelectionState {
    last_push: Option<Instant>,
    selected: Option<usize>,
    window: Option<SelectionWindow>,
    generation: u64,
    transitioning_to: Option<bool>,
}

#[derive(Debug)]
struct SelectionWindow {
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl SelectionState {
    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn last_push(&self) -> Option<Instant> {
        self.last_push
    }

    pub fn is_window_open(&self) -> bool {
        self.window.is_some()
    }

    pub fn transitioning_to(&self) -> Option<bool> {
        self.transitioning_to
    }

    /// Evaluates a hardware notification.
    ///
    /// While a corrective write is pending every notification is consumed, the one matching the
    /// target ends the transition. Otherwise only genuine changes count as presses.
    pub fn register(&mut self, on: bool, changed: bool, scene_count: usize, now: Instant) -> Press {
        if let Some(target) = self.transitioning_to {
            if target == on {
                self.transitioning_to = None;
            }
            return Press::Echo;
        }

        if !changed {
            return Press::Unchanged;
        }

        self.last_push = Some(now);
        self.selected = if self.is_window_open() {
            match self.selected {
                None => Some(0),
                Some(i) if i + 1 < scene_count => Some(i + 1),
                Some(_) => None,
            }
        } else if self.selected.is_none() {
            Some(0)
        } else {
            None
        };

        Press::Selected(self.selected)
    }

    /// Opens (or restarts) the selection window and returns its generation. A running timer of
    /// an earlier window is aborted.
    pub fn open_window(&mut self) -> u64 {
        if let Some(SelectionWindow { timer: Some(timer), .. }) = self.window.take() {
            timer.abort();
        }

        self.generation += 1;
        self.window = Some(SelectionWindow {
            generation: self.generation,
            timer: None,
        });
        self.generation
    }

    pub fn attach_timer(&mut self, generation: u64, timer: JoinHandle<()>) {
        match &mut self.window {
            Some(window) if window.generation == generation => window.timer = Some(timer),
            _ => timer.abort(),
        }
    }

    /// Closes the window if it still belongs to `generation`.
    pub fn close_window(&mut self, generation: u64) -> bool {
        match &self.window {
            Some(window) if window.generation == generation => {
                self.window = None;
                true
            }
            _ => false,
        }
    }

    pub fn begin_transition(&mut self, to: bool) {
        self.transitioning_to = Some(to);
    }

    pub fn abandon_transition(&mut self) {
        self.transitioning_to = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(state: &mut SelectionState, on: bool) -> Press {
        state.register(on, true, 2, Instant::now())
    }

    #[test]
    fn test_isolated_press_from_off_selects_first_scene() {
        let mut state = SelectionState::default();

        assert_eq!(press(&mut state, true), Press::Selected(Some(0)));
        assert!(state.last_push().is_some());
    }

    #[test]
    fn test_isolated_press_when_selected_turns_off() {
        let mut state = SelectionState::default();
        press(&mut state, true);

        assert_eq!(press(&mut state, false), Press::Selected(None));
    }

    #[test]
    fn test_rapid_presses_cycle_through_scenes_and_off() {
        let mut state = SelectionState::default();

        assert_eq!(press(&mut state, true), Press::Selected(Some(0)));
        state.open_window();
        assert_eq!(press(&mut state, false), Press::Selected(Some(1)));
        state.open_window();
        assert_eq!(press(&mut state, true), Press::Selected(None));
        state.open_window();
        assert_eq!(press(&mut state, false), Press::Selected(Some(0)));
    }

    #[test]
    fn test_closed_window_restarts_toggle_branch() {
        let mut state = SelectionState::default();
        press(&mut state, true);
        let generation = state.open_window();
        press(&mut state, false);

        let latest = state.open_window();
        assert!(!state.close_window(generation));
        assert!(state.close_window(latest));
        assert_eq!(press(&mut state, true), Press::Selected(None));
    }

    #[test]
    fn test_unchanged_notification_is_ignored() {
        let mut state = SelectionState::default();

        assert_eq!(state.register(true, false, 2, Instant::now()), Press::Unchanged);
        assert_eq!(state.selected(), None);
    }

    #[test]
    fn test_echo_is_consumed_until_target_reached() {
        let mut state = SelectionState::default();
        press(&mut state, true);
        state.begin_transition(true);

        assert_eq!(press(&mut state, false), Press::Echo);
        assert_eq!(state.transitioning_to(), Some(true));
        assert_eq!(state.register(true, false, 2, Instant::now()), Press::Echo);
        assert_eq!(state.transitioning_to(), None);
        assert_eq!(state.selected(), Some(0));
        assert!(!state.is_window_open());
    }

    #[test]
    fn test_scene_for_selection() {
        let switch = OneButtonSwitch::new(
            vec!["pattern".to_string(), "work-lights".to_string()],
            "rafters-off".to_string(),
            Duration::from_millis(2000),
        );

        assert_eq!(switch.scene_for(Some(1)), "work-lights");
        assert_eq!(switch.scene_for(None), "rafters-off");
    }

    #[tokio::test]
    async fn test_reopened_window_aborts_previous_timer() {
        let mut state = SelectionState::default();
        let first = state.open_window();
        let (alive, dropped) = tokio::sync::oneshot::channel::<()>();
        let timer = tokio::spawn(async move {
            let _alive = alive;
            std::future::pending::<()>().await
        });
        state.attach_timer(first, timer);

        state.open_window();

        assert!(dropped.await.is_err());
    }
}
