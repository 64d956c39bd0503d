//! The bit-banged SPI master engine.
//!
//! [`SoftSpi`] generates a complete single-master SPI physical layer (chip-select framing,
//! clock generation in any of the four standard modes, MSB-first full-duplex shifting) over
//! four plain `embedded-hal` `digital::v2` pins: three master-driven outputs (chip select, MOSI,
//! clock) and one input (MISO).
//!
//! SPI has no acknowledgment concept, so there is no protocol-level failure and no status
//! enumeration: a transfer that touches the wires succeeds. The error channel only carries
//! faults thrown by the pins themselves, and the one representable caller mistake, a transfer
//! with neither buffer, panics before any line is touched.

use hal::blocking::delay::DelayUs;
use hal::digital::v2::{InputPin, OutputPin};
use hal::spi::{Mode, Phase, Polarity, MODE_0};

/// Connection settings for a [`SoftSpi`] engine. Immutable once the engine is constructed.
///
/// Words are always 8 bits wide; the `u8` buffer types enforce that, so there is no word-length
/// setting to get wrong.
#[derive(Clone, Copy)]
pub struct SpiConfig {
    mode: Mode,
    cs_active_high: bool,
    cs_setup_time_us: u32,
    cs_hold_time_us: u32,
    clock_hz: Option<u32>,
}

impl Default for SpiConfig {
    /// Mode 0, active-low chip select, no setup/hold padding, clock as fast as the pins can
    /// toggle.
    fn default() -> Self {
        Self {
            mode: MODE_0,
            cs_active_high: false,
            cs_setup_time_us: 0,
            cs_hold_time_us: 0,
            clock_hz: None,
        }
    }
}

impl SpiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select one of the four standard clock modes. Polarity picks the clock's idle level, phase
    /// picks whether data is sampled on the leading or the trailing edge of each clock pulse.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Make the chip-select line active-high instead of the default active-low.
    pub fn cs_active_high(mut self, active_high: bool) -> Self {
        self.cs_active_high = active_high;
        self
    }

    /// Pause this long between asserting chip select and the first clock edge.
    pub fn cs_setup_time_us(mut self, us: u32) -> Self {
        self.cs_setup_time_us = us;
        self
    }

    /// Pause this long between the last clock edge and releasing chip select.
    pub fn cs_hold_time_us(mut self, us: u32) -> Self {
        self.cs_hold_time_us = us;
        self
    }

    /// Pace the bit clock toward the given frequency by delaying each half period. Without this
    /// the clock runs at whatever rate the pin writes achieve, which on a fast core may be too
    /// quick for a slow slave.
    pub fn clock_hz(mut self, hz: u32) -> Self {
        self.clock_hz = Some(hz);
        self
    }
}

/// The union of all errors an SPI transfer may return, one variant per line.
#[derive(Debug, PartialEq)]
pub enum SpiError<CSE, MOE, MIE, CKE> {
    /// The chip-select line threw an error.
    Cs(CSE),
    /// The MOSI line threw an error.
    Mosi(MOE),
    /// The MISO line threw an error.
    Miso(MIE),
    /// The clock line threw an error.
    Clock(CKE),
}

impl<CSE, MOE, MIE, CKE> SpiError<CSE, MOE, MIE, CKE> {
    fn from_cs(e: CSE) -> Self {
        SpiError::Cs(e)
    }
    fn from_mosi(e: MOE) -> Self {
        SpiError::Mosi(e)
    }
    fn from_miso(e: MIE) -> Self {
        SpiError::Miso(e)
    }
    fn from_clock(e: CKE) -> Self {
        SpiError::Clock(e)
    }
}

/// A bit-banged SPI master owning its four lines and a delay provider.
///
/// Like the I2C engine it is strictly sequential and lock-free; share it between contexts by
/// serializing whole transfers externally (see the `mutex` module).
pub struct SoftSpi<CS, MOSI, MISO, SCK, D> {
    cs: CS,
    mosi: MOSI,
    miso: MISO,
    sck: SCK,
    delay: D,
    clock_idle_high: bool,
    sample_on_leading_edge: bool,
    cs_active_high: bool,
    cs_setup_time_us: u32,
    cs_hold_time_us: u32,
    /// Zero means unpaced.
    half_period_us: u32,
}

impl<CS, MOSI, MISO, SCK, D> SoftSpi<CS, MOSI, MISO, SCK, D>
where
    CS: OutputPin,
    MOSI: OutputPin,
    MISO: InputPin,
    SCK: OutputPin,
    D: DelayUs<u32>,
{
    /// Create an engine on the given lines and put every wire into its documented idle state:
    /// clock at the mode's idle level, MOSI high, chip select inactive. MISO is read once to
    /// settle the input path.
    pub fn new(
        cs: CS,
        mosi: MOSI,
        miso: MISO,
        sck: SCK,
        delay: D,
        config: SpiConfig,
    ) -> Result<Self, SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>> {
        let half_period_us = match config.clock_hz {
            Some(hz) if hz > 0 => 500_000 / hz,
            _ => 0,
        };
        let mut spi = Self {
            cs,
            mosi,
            miso,
            sck,
            delay,
            clock_idle_high: config.mode.polarity == Polarity::IdleHigh,
            sample_on_leading_edge: config.mode.phase == Phase::CaptureOnFirstTransition,
            cs_active_high: config.cs_active_high,
            cs_setup_time_us: config.cs_setup_time_us,
            cs_hold_time_us: config.cs_hold_time_us,
            half_period_us,
        };
        spi.clock_to(false)?;
        spi.miso.is_high().map_err(SpiError::from_miso)?;
        spi.mosi.set_high().map_err(SpiError::from_mosi)?;
        spi.deselect()?;
        Ok(spi)
    }

    /// Shift `buffer` out in one chip-select frame, discarding whatever the slave sends back.
    pub fn write(
        &mut self,
        buffer: &[u8],
    ) -> Result<(), SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>> {
        self.transfer(Some(buffer), None, true)
    }

    /// Fill `buffer` from the slave in one chip-select frame, shifting out `0x00` filler.
    pub fn read(
        &mut self,
        buffer: &mut [u8],
    ) -> Result<(), SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>> {
        self.transfer(None, Some(buffer), true)
    }

    /// Write then read under one continuous chip select: the select line stays asserted across
    /// the seam between the two shifts, which is what command-then-response slaves require.
    pub fn write_then_read(
        &mut self,
        write_buffer: &[u8],
        read_buffer: &mut [u8],
    ) -> Result<(), SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>> {
        self.transfer(Some(write_buffer), None, false)?;
        self.transfer(None, Some(read_buffer), true)
    }

    /// One simultaneous full-duplex transfer: byte `i` of `write_buffer` shifts out while byte
    /// `i` of `read_buffer` shifts in.
    pub fn write_and_read(
        &mut self,
        write_buffer: &[u8],
        read_buffer: &mut [u8],
    ) -> Result<(), SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>> {
        self.transfer(Some(write_buffer), Some(read_buffer), true)
    }

    /// Full-duplex transfer replacing each byte of `words` with the byte the slave sent back.
    /// Frames with chip select like the other operations.
    pub fn transfer_in_place(
        &mut self,
        words: &mut [u8],
    ) -> Result<(), SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>> {
        self.open_frame()?;
        for word in words.iter_mut() {
            *word = self.shift_byte(*word)?;
        }
        self.close_frame(true)
    }

    /// The single transfer primitive everything else is layered on. Shifts
    /// `max(write len, read len)` bytes; output comes from `write` or `0x00` filler beyond its
    /// end, input lands in `read` while within its bounds. Chip select is asserted on entry and
    /// released on exit only when `deselect_after`; leaving it asserted chains this transfer
    /// with the next one.
    ///
    /// # Panics
    ///
    /// Panics if both buffers are `None`; that is a caller bug, and no line is touched.
    pub fn transfer(
        &mut self,
        write: Option<&[u8]>,
        mut read: Option<&mut [u8]>,
        deselect_after: bool,
    ) -> Result<(), SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>> {
        if write.is_none() && read.is_none() {
            panic!("at least one of the write and read buffers must be provided");
        }
        let write_len = write.map_or(0, |buffer| buffer.len());
        let read_len = read.as_ref().map_or(0, |buffer| buffer.len());
        if let Some(ref mut buffer) = read {
            for slot in buffer.iter_mut() {
                *slot = 0;
            }
        }
        self.open_frame()?;
        for i in 0..core::cmp::max(write_len, read_len) {
            let out = write.and_then(|buffer| buffer.get(i)).cloned().unwrap_or(0);
            let input = self.shift_byte(out)?;
            if let Some(ref mut buffer) = read {
                if i < buffer.len() {
                    buffer[i] = input;
                }
            }
        }
        self.close_frame(deselect_after)
    }

    /// Clock one byte out on MOSI while accumulating one from MISO, MSB first. Leading-edge
    /// modes present and sample while the clock sits at idle, then clock the leading edge;
    /// trailing-edge modes clock the leading edge first and sample before trailing back.
    fn shift_byte(
        &mut self,
        out: u8,
    ) -> Result<u8, SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>> {
        let mut input = 0u8;
        let mut mask = 0x80u8;
        while mask != 0 {
            let bit = out & mask != 0;
            if self.sample_on_leading_edge {
                self.clock_to(false)?;
                self.write_mosi(bit)?;
                if self.miso.is_high().map_err(SpiError::from_miso)? {
                    input |= mask;
                }
                self.pace();
                self.clock_to(true)?;
                self.pace();
            } else {
                self.clock_to(true)?;
                self.write_mosi(bit)?;
                if self.miso.is_high().map_err(SpiError::from_miso)? {
                    input |= mask;
                }
                self.pace();
                self.clock_to(false)?;
                self.pace();
            }
            mask >>= 1;
        }
        Ok(input)
    }

    fn open_frame(
        &mut self,
    ) -> Result<(), SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>> {
        self.clock_to(false)?;
        self.select()?;
        if self.cs_setup_time_us > 0 {
            self.delay.delay_us(self.cs_setup_time_us);
        }
        Ok(())
    }

    fn close_frame(
        &mut self,
        deselect_after: bool,
    ) -> Result<(), SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>> {
        self.clock_to(false)?;
        if self.cs_hold_time_us > 0 {
            self.delay.delay_us(self.cs_hold_time_us);
        }
        if deselect_after {
            self.deselect()?;
        }
        Ok(())
    }

    /// Drive the clock to its idle (`active == false`) or active level under the configured
    /// polarity.
    fn clock_to(
        &mut self,
        active: bool,
    ) -> Result<(), SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>> {
        if active != self.clock_idle_high {
            self.sck.set_high().map_err(SpiError::from_clock)
        } else {
            self.sck.set_low().map_err(SpiError::from_clock)
        }
    }

    fn write_mosi(
        &mut self,
        bit: bool,
    ) -> Result<(), SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>> {
        if bit {
            self.mosi.set_high().map_err(SpiError::from_mosi)
        } else {
            self.mosi.set_low().map_err(SpiError::from_mosi)
        }
    }

    fn select(&mut self) -> Result<(), SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>> {
        if self.cs_active_high {
            self.cs.set_high().map_err(SpiError::from_cs)
        } else {
            self.cs.set_low().map_err(SpiError::from_cs)
        }
    }

    fn deselect(
        &mut self,
    ) -> Result<(), SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>> {
        if self.cs_active_high {
            self.cs.set_low().map_err(SpiError::from_cs)
        } else {
            self.cs.set_high().map_err(SpiError::from_cs)
        }
    }

    fn pace(&mut self) {
        if self.half_period_us > 0 {
            self.delay.delay_us(self.half_period_us);
        }
    }
}

impl<CS, MOSI, MISO, SCK, D> hal::blocking::spi::Write<u8> for SoftSpi<CS, MOSI, MISO, SCK, D>
where
    CS: OutputPin,
    MOSI: OutputPin,
    MISO: InputPin,
    SCK: OutputPin,
    D: DelayUs<u32>,
{
    type Error = SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>;

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        SoftSpi::write(self, words)
    }
}

impl<CS, MOSI, MISO, SCK, D> hal::blocking::spi::Transfer<u8> for SoftSpi<CS, MOSI, MISO, SCK, D>
where
    CS: OutputPin,
    MOSI: OutputPin,
    MISO: InputPin,
    SCK: OutputPin,
    D: DelayUs<u32>,
{
    type Error = SpiError<CS::Error, MOSI::Error, MISO::Error, SCK::Error>;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
        self.transfer_in_place(words)?;
        Ok(words)
    }
}
