use crate::machine::VirtualMachine;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// one of the 16 COSMAC keypad symbols, 0x0 to 0xF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeySymbol(u8);

impl KeySymbol {
    pub fn new(symbol: u8) -> Option<Self> {
        (symbol <= 0x0f).then_some(KeySymbol(symbol))
    }

    pub fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for KeySymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEdge {
    Press,
    Release,
}

/// keypad layout on the left-hand side of a qwerty keyboard
///
///   1 2 3 C      1 2 3 4
///   4 5 6 D  <-  q w e r
///   7 8 9 E      a s d f
///   A 0 B F      z x c v
const CHIP8_QWERTY_KEYMAP: [(char, u8); 16] = [
    ('x', 0x00),
    ('1', 0x01),
    ('2', 0x02),
    ('3', 0x03),
    ('q', 0x04),
    ('w', 0x05),
    ('e', 0x06),
    ('a', 0x07),
    ('s', 0x08),
    ('d', 0x09),
    ('z', 0x0a),
    ('c', 0x0b),
    ('4', 0x0c),
    ('r', 0x0d),
    ('f', 0x0e),
    ('v', 0x0f),
];

/// ditto for german keyboards, where y and z trade places
const CHIP8_QWERTZ_KEYMAP: [(char, u8); 16] = [
    ('x', 0x00),
    ('1', 0x01),
    ('2', 0x02),
    ('3', 0x03),
    ('q', 0x04),
    ('w', 0x05),
    ('e', 0x06),
    ('a', 0x07),
    ('s', 0x08),
    ('d', 0x09),
    ('y', 0x0a),
    ('c', 0x0b),
    ('4', 0x0c),
    ('r', 0x0d),
    ('f', 0x0e),
    ('v', 0x0f),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyLayout {
    #[default]
    Qwerty,
    Qwertz,
}

impl KeyLayout {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "qwerty" => Some(KeyLayout::Qwerty),
            "qwertz" => Some(KeyLayout::Qwertz),
            _ => None,
        }
    }

    fn table(self) -> &'static [(char, u8); 16] {
        match self {
            KeyLayout::Qwerty => &CHIP8_QWERTY_KEYMAP,
            KeyLayout::Qwertz => &CHIP8_QWERTZ_KEYMAP,
        }
    }
}

/// Forwards host key edges to the machine's keypad. Holds no key state of its
/// own: the machine's keypad is the only copy, so a repeated press for a held
/// key just sets the same bit again.
pub struct KeyRouter {
    keymap: HashMap<char, KeySymbol>,
}

impl KeyRouter {
    pub fn new(layout: KeyLayout) -> Self {
        let keymap = layout
            .table()
            .iter()
            .map(|&(key, symbol)| (key, KeySymbol(symbol)))
            .collect();
        KeyRouter { keymap }
    }

    /// keypad symbol for a host key, matched case-insensitively
    pub fn symbol_for(&self, key: char) -> Option<KeySymbol> {
        key.to_lowercase()
            .next()
            .and_then(|k| self.keymap.get(&k).copied())
    }

    /// forward one edge; unmapped keys are dropped and return `None`
    pub fn route(
        &self,
        machine: &mut impl VirtualMachine,
        key: char,
        edge: KeyEdge,
    ) -> Option<KeySymbol> {
        let symbol = self.symbol_for(key)?;
        machine.set_key(symbol, edge == KeyEdge::Press);
        tracing::trace!(%symbol, ?edge, "key routed");
        Some(symbol)
    }
}
