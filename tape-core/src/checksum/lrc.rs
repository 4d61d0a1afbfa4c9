//! Longitudinal redundancy character: the XOR of every data byte in a block.

/// Accumulates the LRC of a byte stream one byte at a time.
#[derive(Copy, Clone, Debug, Default)]
pub struct Lrc {
    reg: u16,
}

impl Lrc {
    pub fn new() -> Self {
        Lrc::default()
    }

    pub fn update(&mut self, byte: u16) {
        self.reg ^= byte;
    }

    pub fn finish(&self) -> u16 {
        self.reg
    }
}
