//! Keyboard-wedge barcode decoding.
//!
//! A wedge scanner "types" the barcode as a burst of keystrokes a few
//! milliseconds apart, followed by Enter. Humans type far slower, so a gap
//! longer than [`DecoderConfig::max_keystroke_gap`] means whatever was
//! buffered came from a person and is thrown away.

use std::time::{Duration, Instant};

use crate::submission::MIN_BARCODE_LEN;

/// A single key as reported by the keyboard source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    /// Any other named key (Shift, Tab, F1, ...). Ignored by the decoder.
    Named(String),
}

impl Key {
    /// Map a DOM-style key name (`"a"`, `"Enter"`, `"Shift"`) to a [`Key`].
    pub fn from_name(name: &str) -> Self {
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Key::Char(c),
            _ if name == "Enter" => Key::Enter,
            _ => Key::Named(name.to_string()),
        }
    }
}

/// Where the keystroke was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// Not inside any interactive text field.
    Document,
    /// A focused text field belonging to some form; never decoded.
    TextField,
    /// The scanner's own hidden receiver field.
    ScannerReceiver,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub origin: KeyOrigin,
    pub at: Instant,
}

impl KeyEvent {
    pub fn new(key: Key, origin: KeyOrigin, at: Instant) -> Self {
        Self { key, origin, at }
    }

    pub fn char(c: char, at: Instant) -> Self {
        Self::new(Key::Char(c), KeyOrigin::Document, at)
    }

    pub fn enter(at: Instant) -> Self {
        Self::new(Key::Enter, KeyOrigin::Document, at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Longest pause between two characters of the same barcode.
    pub max_keystroke_gap: Duration,
    /// Shortest trimmed barcode that is emitted.
    pub min_length: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_keystroke_gap: Duration::from_millis(100),
            min_length: MIN_BARCODE_LEN,
        }
    }
}

/// Reconstructs barcodes from a keystroke stream.
///
/// Starts inactive; the owner activates it while a session is active.
#[derive(Debug, Clone)]
pub struct ScanDecoder {
    config: DecoderConfig,
    buffer: String,
    last_keystroke: Option<Instant>,
    active: bool,
}

impl ScanDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            last_keystroke: None,
            active: false,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Stop decoding and drop any partial input so it cannot leak into a later session.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.clear();
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.last_keystroke = None;
    }

    /// Characters accumulated since the last Enter (or gap reset).
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Feed one keystroke; returns a barcode when this keystroke completed one.
    pub fn push(&mut self, event: &KeyEvent) -> Option<String> {
        if !self.active || event.origin == KeyOrigin::TextField {
            return None;
        }

        match &event.key {
            Key::Char(c) if !c.is_control() => {
                if let Some(last) = self.last_keystroke {
                    if event.at.saturating_duration_since(last) > self.config.max_keystroke_gap {
                        self.buffer.clear();
                    }
                }
                self.buffer.push(*c);
                self.last_keystroke = Some(event.at);
                None
            }
            Key::Enter => {
                let raw = std::mem::take(&mut self.buffer);
                let barcode = raw.trim();
                (barcode.chars().count() >= self.config.min_length).then(|| barcode.to_string())
            }
            _ => None,
        }
    }

    /// Lazily decode an arbitrary (possibly unbounded) keystroke stream.
    pub fn decode<I>(&mut self, events: I) -> Barcodes<'_, I::IntoIter>
    where
        I: IntoIterator<Item = KeyEvent>,
    {
        Barcodes {
            decoder: self,
            events: events.into_iter(),
        }
    }
}

impl Default for ScanDecoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

/// Iterator of completed barcodes, see [`ScanDecoder::decode`].
pub struct Barcodes<'a, I> {
    decoder: &'a mut ScanDecoder,
    events: I,
}

impl<I> Iterator for Barcodes<'_, I>
where
    I: Iterator<Item = KeyEvent>,
{
    type Item = String;

    fn next(&mut self) -> Option<String> {
        for event in self.events.by_ref() {
            if let Some(barcode) = self.decoder.push(&event) {
                return Some(barcode);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn burst(text: &str, start: Instant, step_ms: u64) -> Vec<KeyEvent> {
        let mut events: Vec<KeyEvent> = text
            .chars()
            .enumerate()
            .map(|(i, c)| KeyEvent::char(c, start + Duration::from_millis(step_ms * i as u64)))
            .collect();
        let end = start + Duration::from_millis(step_ms * text.chars().count() as u64);
        events.push(KeyEvent::enter(end));
        events
    }

    fn active_decoder() -> ScanDecoder {
        let mut decoder = ScanDecoder::default();
        decoder.activate();
        decoder
    }

    #[test]
    fn scanner_burst_emits_barcode() {
        let mut decoder = active_decoder();
        let out: Vec<String> = decoder.decode(burst("DRUM-0042", Instant::now(), 5)).collect();
        assert_eq!(out, vec!["DRUM-0042".to_string()]);
        assert!(decoder.buffered().is_empty());
    }

    #[test]
    fn pause_longer_than_gap_discards_earlier_characters() {
        let mut decoder = active_decoder();
        let t0 = Instant::now();
        let events = vec![
            KeyEvent::char('A', t0),
            KeyEvent::char('B', t0 + Duration::from_millis(5)),
            KeyEvent::char('C', t0 + Duration::from_millis(155)),
            KeyEvent::enter(t0 + Duration::from_millis(160)),
        ];
        let out: Vec<String> = decoder.decode(events).collect();
        assert!(out.is_empty(), "only \"C\" survived the pause and is too short");
    }

    #[test]
    fn pause_then_full_scan_emits_only_the_scan() {
        let mut decoder = active_decoder();
        let t0 = Instant::now();
        let mut events = vec![KeyEvent::char('x', t0), KeyEvent::char('y', t0)];
        events.extend(burst("12345", t0 + Duration::from_millis(500), 3));
        let out: Vec<String> = decoder.decode(events).collect();
        assert_eq!(out, vec!["12345".to_string()]);
    }

    #[test]
    fn short_completion_is_dropped_and_buffer_cleared() {
        let mut decoder = active_decoder();
        let t0 = Instant::now();
        assert_eq!(decoder.push(&KeyEvent::char('A', t0)), None);
        assert_eq!(decoder.push(&KeyEvent::char('B', t0)), None);
        assert_eq!(decoder.push(&KeyEvent::enter(t0)), None);
        assert!(decoder.buffered().is_empty());

        let out: Vec<String> = decoder.decode(burst("XYZ", t0, 1)).collect();
        assert_eq!(out, vec!["XYZ".to_string()]);
    }

    #[test]
    fn whitespace_is_trimmed_before_length_check() {
        let mut decoder = active_decoder();
        let out: Vec<String> = decoder.decode(burst("  AB  ", Instant::now(), 1)).collect();
        assert!(out.is_empty());

        let out: Vec<String> = decoder.decode(burst(" ABC ", Instant::now(), 1)).collect();
        assert_eq!(out, vec!["ABC".to_string()]);
    }

    #[test]
    fn text_field_typing_is_ignored_but_scanner_receiver_is_decoded() {
        let mut decoder = active_decoder();
        let t0 = Instant::now();
        for c in "hello".chars() {
            decoder.push(&KeyEvent::new(Key::Char(c), KeyOrigin::TextField, t0));
        }
        assert!(decoder.buffered().is_empty());
        assert_eq!(
            decoder.push(&KeyEvent::new(Key::Enter, KeyOrigin::TextField, t0)),
            None
        );

        for c in "B-77".chars() {
            decoder.push(&KeyEvent::new(Key::Char(c), KeyOrigin::ScannerReceiver, t0));
        }
        assert_eq!(
            decoder.push(&KeyEvent::new(Key::Enter, KeyOrigin::ScannerReceiver, t0)),
            Some("B-77".to_string())
        );
    }

    #[test]
    fn inactive_decoder_emits_nothing_and_deactivate_clears() {
        let mut decoder = ScanDecoder::default();
        let out: Vec<String> = decoder.decode(burst("ABCDEF", Instant::now(), 1)).collect();
        assert!(out.is_empty());

        decoder.activate();
        let t0 = Instant::now();
        decoder.push(&KeyEvent::char('Q', t0));
        decoder.push(&KeyEvent::char('R', t0));
        decoder.deactivate();
        decoder.activate();
        decoder.push(&KeyEvent::char('S', t0));
        assert_eq!(decoder.push(&KeyEvent::enter(t0)), None);
    }

    #[test]
    fn named_keys_do_not_touch_the_buffer() {
        let mut decoder = active_decoder();
        let t0 = Instant::now();
        decoder.push(&KeyEvent::char('1', t0));
        decoder.push(&KeyEvent::new(Key::from_name("Shift"), KeyOrigin::Document, t0));
        decoder.push(&KeyEvent::char('2', t0));
        decoder.push(&KeyEvent::char('3', t0));
        assert_eq!(decoder.push(&KeyEvent::enter(t0)), Some("123".to_string()));
    }

    #[test]
    fn key_names_map_to_keys() {
        assert_eq!(Key::from_name("a"), Key::Char('a'));
        assert_eq!(Key::from_name("Enter"), Key::Enter);
        assert_eq!(Key::from_name("Tab"), Key::Named("Tab".to_string()));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: every emitted barcode is at least the minimum length, and
        /// nothing is emitted without an Enter.
        #[test]
        fn emissions_require_enter_and_min_length(
            keys in proptest::collection::vec((prop_oneof![
                "[A-Za-z0-9 -]".prop_map(|s| Key::Char(s.chars().next().unwrap())),
                Just(Key::Enter),
            ], 0u64..250), 0..60)
        ) {
            let mut decoder = active_decoder();
            let mut now = Instant::now();
            let mut enters = 0usize;
            let mut emitted = 0usize;
            for (key, gap) in keys {
                now += Duration::from_millis(gap);
                if key == Key::Enter {
                    enters += 1;
                }
                if let Some(barcode) = decoder.push(&KeyEvent::new(key, KeyOrigin::Document, now)) {
                    emitted += 1;
                    prop_assert!(barcode.chars().count() >= MIN_BARCODE_LEN);
                    prop_assert_eq!(barcode.trim(), barcode.as_str());
                }
            }
            prop_assert!(emitted <= enters);
        }

        /// Property: a pause longer than the gap before a character means no
        /// emitted barcode contains anything typed before the pause.
        #[test]
        fn characters_before_a_long_pause_never_survive(
            before in "[A-Z]{1,8}",
            after in "[0-9]{1,8}",
            pause in 101u64..5_000,
        ) {
            let mut decoder = active_decoder();
            let t0 = Instant::now();
            let mut events = Vec::new();
            for c in before.chars() {
                events.push(KeyEvent::char(c, t0));
            }
            let resume = t0 + Duration::from_millis(pause);
            for c in after.chars() {
                events.push(KeyEvent::char(c, resume));
            }
            events.push(KeyEvent::enter(resume));

            let out: Vec<String> = decoder.decode(events).collect();
            if after.len() >= MIN_BARCODE_LEN {
                prop_assert_eq!(out, vec![after.clone()]);
            } else {
                prop_assert!(out.is_empty());
            }
        }
    }
}
