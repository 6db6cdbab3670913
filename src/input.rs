use crate::keypad::KeyEdge;
use crossterm::event::{poll, read, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal;
use std::collections::HashMap;
use std::io;
use std::time::Duration;

/// longer than the usual terminal auto-repeat delay (500 to 660 ms), so a
/// held key is not released before its first repeat arrives
pub const DEFAULT_KEY_HOLD_MS: f64 = 700.0;

/// what the host wants from the drive layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Key(char, KeyEdge),
    /// stand-in for the window being hidden or shown again
    ToggleVisibility,
    NextProgram,
    PreviousProgram,
    Quit,
}

/// reads host input
pub trait Input {
    /// append everything that happened since the last call to `events`
    fn poll_events(&mut self, now_ms: f64, events: &mut Vec<HostEvent>) -> Result<(), io::Error>;
}

/// Terminals only ever report key presses (plus auto-repeat), never releases.
/// A key counts as held while it keeps repeating; once it has been quiet for
/// `hold_ms` a release is made up for it.
#[derive(Debug)]
pub struct HeldKeys {
    hold_ms: f64,
    last_seen: HashMap<char, f64>,
}

impl HeldKeys {
    pub fn new(hold_ms: f64) -> Self {
        HeldKeys {
            hold_ms,
            last_seen: HashMap::new(),
        }
    }

    /// a press (or repeat) arrived; only the first one of a hold is an edge
    pub fn press(&mut self, key: char, now_ms: f64, events: &mut Vec<HostEvent>) {
        if self.last_seen.insert(key, now_ms).is_none() {
            events.push(HostEvent::Key(key, KeyEdge::Press));
        }
    }

    /// release every key that has gone quiet
    pub fn expire(&mut self, now_ms: f64, events: &mut Vec<HostEvent>) {
        let hold_ms = self.hold_ms;
        self.last_seen.retain(|key, seen| {
            let held = now_ms - *seen < hold_ms;
            if !held {
                events.push(HostEvent::Key(*key, KeyEdge::Release));
            }
            held
        });
    }

    /// release everything now
    pub fn release_all(&mut self, events: &mut Vec<HostEvent>) {
        events.extend(
            self.last_seen
                .drain()
                .map(|(key, _)| HostEvent::Key(key, KeyEdge::Release)),
        );
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Translated {
    /// may or may not be on the keypad; the router decides
    Key(char),
    Command(HostEvent),
}

fn translate(evt: KeyEvent) -> Option<Translated> {
    use Translated::*;
    match evt.code {
        KeyCode::Char('c') if evt.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Command(HostEvent::Quit))
        }
        KeyCode::Char('p') | KeyCode::Char('P') => Some(Command(HostEvent::ToggleVisibility)),
        KeyCode::Char(key) => Some(Key(key.to_ascii_lowercase())),
        KeyCode::Esc => Some(Command(HostEvent::Quit)),
        KeyCode::Tab => Some(Command(HostEvent::NextProgram)),
        KeyCode::BackTab => Some(Command(HostEvent::PreviousProgram)),
        _ => None,
    }
}

/// simple implementation of Input, using crossterm in raw mode
pub struct StdinInput {
    held: HeldKeys,
}

impl StdinInput {
    pub fn new(hold_ms: f64) -> Result<Self, io::Error> {
        terminal::enable_raw_mode()?;
        Ok(StdinInput {
            held: HeldKeys::new(hold_ms),
        })
    }
}

impl Drop for StdinInput {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

impl Input for StdinInput {
    fn poll_events(&mut self, now_ms: f64, events: &mut Vec<HostEvent>) -> Result<(), io::Error> {
        while poll(Duration::from_millis(0))? {
            match read()? {
                Event::Key(evt) => match translate(evt) {
                    Some(Translated::Key(key)) => self.held.press(key, now_ms, events),
                    Some(Translated::Command(HostEvent::ToggleVisibility)) => {
                        // nothing stays held across a hide
                        self.held.release_all(events);
                        events.push(HostEvent::ToggleVisibility);
                    }
                    Some(Translated::Command(cmd)) => events.push(cmd),
                    None => tracing::debug!(?evt, "unhandled key"),
                },
                Event::Resize(w, h) => tracing::debug!(w, h, "terminal resized"),
                _ => {}
            }
        }
        self.held.expire(now_ms, events);
        Ok(())
    }
}

/// dummy Input implementation for testing
pub struct DummyInput {
    events: Vec<HostEvent>,
}

impl DummyInput {
    pub fn new(events: &[HostEvent]) -> Self {
        DummyInput {
            events: Vec::from(events),
        }
    }
}

impl Input for DummyInput {
    fn poll_events(&mut self, _now_ms: f64, events: &mut Vec<HostEvent>) -> Result<(), io::Error> {
        events.append(&mut self.events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_press_is_edge_repeats_are_not() {
        let mut held = HeldKeys::new(100.0);
        let mut events = Vec::new();
        held.press('q', 0.0, &mut events);
        held.press('q', 30.0, &mut events);
        held.press('q', 60.0, &mut events);
        assert_eq!(events, vec![HostEvent::Key('q', KeyEdge::Press)]);
    }

    #[test]
    fn test_release_made_up_after_hold() {
        let mut held = HeldKeys::new(100.0);
        let mut events = Vec::new();
        held.press('w', 0.0, &mut events);
        held.press('w', 80.0, &mut events);
        held.expire(150.0, &mut events);
        assert_eq!(events.len(), 1);
        held.expire(180.0, &mut events);
        assert_eq!(
            events,
            vec![
                HostEvent::Key('w', KeyEdge::Press),
                HostEvent::Key('w', KeyEdge::Release)
            ]
        );
        // pressed again after release is a new edge
        held.press('w', 200.0, &mut events);
        assert_eq!(events.last(), Some(&HostEvent::Key('w', KeyEdge::Press)));
    }

    #[test]
    fn test_default_hold_outlasts_repeat_delay() {
        let mut held = HeldKeys::new(DEFAULT_KEY_HOLD_MS);
        let mut events = Vec::new();
        held.press('e', 0.0, &mut events);
        // first auto-repeat after a 660 ms delay
        held.expire(650.0, &mut events);
        held.press('e', 660.0, &mut events);
        assert_eq!(events, vec![HostEvent::Key('e', KeyEdge::Press)]);
    }

    #[test]
    fn test_release_all() {
        let mut held = HeldKeys::new(100.0);
        let mut events = Vec::new();
        held.press('a', 0.0, &mut events);
        held.press('s', 0.0, &mut events);
        events.clear();
        held.release_all(&mut events);
        events.sort_by_key(|e| match e {
            HostEvent::Key(k, _) => *k,
            _ => '\0',
        });
        assert_eq!(
            events,
            vec![
                HostEvent::Key('a', KeyEdge::Release),
                HostEvent::Key('s', KeyEdge::Release)
            ]
        );
    }

    #[test]
    fn test_translate_commands() {
        let key = |code, modifiers| KeyEvent { code, modifiers };
        assert_eq!(
            translate(key(KeyCode::Esc, KeyModifiers::NONE)),
            Some(Translated::Command(HostEvent::Quit))
        );
        assert_eq!(
            translate(key(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Translated::Command(HostEvent::Quit))
        );
        assert_eq!(
            translate(key(KeyCode::Char('C'), KeyModifiers::SHIFT)),
            Some(Translated::Key('c'))
        );
        assert_eq!(
            translate(key(KeyCode::Tab, KeyModifiers::NONE)),
            Some(Translated::Command(HostEvent::NextProgram))
        );
        assert_eq!(translate(key(KeyCode::F(1), KeyModifiers::NONE)), None);
    }

    #[test]
    fn test_dummy_input_drains() {
        let mut i = DummyInput::new(&[HostEvent::Quit]);
        let mut events = Vec::new();
        i.poll_events(0.0, &mut events).unwrap();
        i.poll_events(1.0, &mut events).unwrap();
        assert_eq!(events, vec![HostEvent::Quit]);
    }
}
