//! The digital line abstraction the bus engines are built on.
//!
//! The I2C engine needs lines it can *release* (high-impedance, pulled high externally) or
//! actively drive low, and whose electrical level it can sample at any time; that capability is
//! the [`OpenDrainPin`] trait. The SPI engine needs nothing beyond plain push-pull levels, so it
//! consumes the `embedded-hal` `digital::v2` pin traits directly and no crate-local trait is
//! interposed there.

#[cfg(feature = "unproven")]
use hal::digital::v2::InputPin;
#[cfg(feature = "unproven")]
use hal::digital::v2::OutputPin;

/// A single open-drain bus line (SDA or SCL), owned exclusively by one engine.
///
/// An open-drain line is never driven high: a `1` is produced by releasing the line and letting
/// the external pull-up raise it, which is also what permits a slave to hold the line low against
/// the master (ACK bits, clock stretching). Implementations are expected to be infallible on sane
/// hardware; the error channel exists so that fallible HAL pins can be plumbed through without
/// loss.
pub trait OpenDrainPin {
    /// The type of error that line operations may return.
    type Error;

    /// Stop driving the line. The external pull-up will float it high unless another party on the
    /// bus is holding it low.
    fn release(&mut self) -> Result<(), Self::Error>;

    /// Actively drive the line low.
    fn assert_low(&mut self) -> Result<(), Self::Error>;

    /// Sample the current electrical level of the wire, regardless of the last commanded drive
    /// direction.
    fn is_high(&mut self) -> Result<bool, Self::Error>;
}

/// Binds any `embedded-hal` pin that is both an `OutputPin` and an `InputPin` as an
/// [`OpenDrainPin`].
///
/// The underlying GPIO must be configured as an open-drain output with a pull-up (most HALs call
/// this `into_open_drain_output` or similar), so that `set_high` releases the line rather than
/// driving it. On such a pin the input reads the physical wire, not the output latch, which is
/// exactly the sampling behavior the engines rely on.
#[cfg(feature = "unproven")]
pub struct OpenDrain<P> {
    pin: P,
}

#[cfg(feature = "unproven")]
impl<P> OpenDrain<P> {
    /// Wrap `pin`, taking ownership. The pin must already be in open-drain mode.
    pub fn new(pin: P) -> Self {
        Self { pin }
    }

    /// Release the wrapped pin.
    pub fn into_inner(self) -> P {
        self.pin
    }
}

#[cfg(feature = "unproven")]
impl<P, E> OpenDrainPin for OpenDrain<P>
where
    P: OutputPin<Error = E> + InputPin<Error = E>,
{
    type Error = E;

    fn release(&mut self) -> Result<(), E> {
        self.pin.set_high()
    }

    fn assert_low(&mut self) -> Result<(), E> {
        self.pin.set_low()
    }

    fn is_high(&mut self) -> Result<bool, E> {
        self.pin.is_high()
    }
}

// This is here (and has to be pub) for doctests only. It's useless otherwise.
#[doc(hidden)]
pub mod noop {
    use super::OpenDrainPin;
    use core::convert::Infallible;

    pub struct NoopLine;

    impl OpenDrainPin for NoopLine {
        type Error = Infallible;
        fn release(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
        fn assert_low(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(true)
        }
    }

    pub struct NoopPin;

    impl hal::digital::v2::OutputPin for NoopPin {
        type Error = Infallible;
        fn set_high(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
        fn set_low(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    #[cfg(feature = "unproven")]
    impl hal::digital::v2::InputPin for NoopPin {
        type Error = Infallible;
        fn is_high(&self) -> Result<bool, Infallible> {
            Ok(true)
        }
        fn is_low(&self) -> Result<bool, Infallible> {
            Ok(false)
        }
    }

    pub struct NoopDelay;

    impl hal::blocking::delay::DelayUs<u32> for NoopDelay {
        fn delay_us(&mut self, _us: u32) {}
    }
}

#[cfg(test)]
pub(crate) mod sim {
    //! Simulated wiring for unit tests: a wired-AND I2C bus with a scriptable cooperative slave,
    //! an SPI line recorder, and a counting delay.

    use super::OpenDrainPin;
    use core::convert::Infallible;
    use hal::blocking::delay::DelayUs;
    use hal::digital::v2::{InputPin, OutputPin};
    use std::sync::{Arc, Mutex};

    /// Script describing how the simulated I2C slave behaves on the wire.
    #[derive(Clone)]
    pub struct SlaveBehavior {
        /// The 7-bit address the slave answers to.
        pub address: u8,
        /// Whether the slave acknowledges its own address at all.
        pub respond: bool,
        /// Index of the written data byte the slave refuses to acknowledge, if any.
        pub nack_data_at: Option<usize>,
        /// Bytes the slave shifts out when read. Exhausted positions read as `0xFF` (line
        /// released).
        pub tx: Vec<u8>,
        /// Number of master SCL polls the slave holds the clock low for after acknowledging its
        /// address. `u32::max_value()` never releases.
        pub stretch_polls: u32,
    }

    impl SlaveBehavior {
        pub fn at(address: u8) -> Self {
            Self {
                address,
                respond: true,
                nack_data_at: None,
                tx: Vec::new(),
                stretch_polls: 0,
            }
        }

        pub fn absent(address: u8) -> Self {
            Self {
                respond: false,
                ..Self::at(address)
            }
        }

        pub fn with_tx(mut self, tx: &[u8]) -> Self {
            self.tx = tx.to_vec();
            self
        }

        pub fn nacking_data_at(mut self, index: usize) -> Self {
            self.nack_data_at = Some(index);
            self
        }

        pub fn stretching(mut self, polls: u32) -> Self {
            self.stretch_polls = polls;
            self
        }
    }

    enum SlaveState {
        Idle,
        /// Shifting in the address byte.
        Address { shift: u8, n: u8 },
        /// Driving (or not driving) the address ACK bit.
        AddressAck { acked: bool, read_mode: bool },
        /// Shifting in a data byte written by the master.
        Receive { shift: u8, n: u8, index: usize },
        /// Driving (or not driving) a data ACK bit.
        DataAck { acked: bool, index: usize },
        /// Driving data bit `bit` of `tx[index]` out on SDA.
        Send { index: usize, bit: u8 },
        /// Waiting for the master's ACK/NACK of the byte just sent.
        MasterAck { index: usize, sampled: Option<bool> },
        /// Unaddressed or NACKed out; ignore everything until the next start or stop.
        Dead,
    }

    /// Shared bus state. Wire levels are the AND of both parties' drives (open-drain), and every
    /// level change is fed through the slave's edge-triggered state machine, so the slave reacts
    /// to exactly the waveform the master produces.
    struct I2cCore {
        master_sda_low: bool,
        master_scl_low: bool,
        slave_sda_low: bool,
        slave_scl_low: bool,
        stretch_remaining: u32,
        state: SlaveState,
        behavior: SlaveBehavior,
        starts: usize,
        stops: usize,
        addressed: Vec<u8>,
        received: Vec<u8>,
        master_acks: Vec<bool>,
    }

    impl I2cCore {
        fn sda(&self) -> bool {
            !(self.master_sda_low || self.slave_sda_low)
        }

        fn scl(&self) -> bool {
            !(self.master_scl_low || self.slave_scl_low)
        }

        fn set_master_sda(&mut self, low: bool) {
            let old = (self.sda(), self.scl());
            self.master_sda_low = low;
            let new = (self.sda(), self.scl());
            self.edge(old, new);
        }

        fn set_master_scl(&mut self, low: bool) {
            let old = (self.sda(), self.scl());
            self.master_scl_low = low;
            let new = (self.sda(), self.scl());
            self.edge(old, new);
        }

        /// A master-side SCL sample. Counts down the remaining stretch polls; when they run out
        /// the slave lets go of the clock, which may raise the line and so must go through edge
        /// handling.
        fn read_scl(&mut self) -> bool {
            if self.slave_scl_low {
                if self.stretch_remaining > 0 && self.stretch_remaining < u32::max_value() {
                    self.stretch_remaining -= 1;
                }
                if self.stretch_remaining == 0 {
                    let old = (self.sda(), self.scl());
                    self.slave_scl_low = false;
                    let new = (self.sda(), self.scl());
                    self.edge(old, new);
                }
            }
            self.scl()
        }

        fn begin_stretch(&mut self) {
            if self.behavior.stretch_polls > 0 {
                self.slave_scl_low = true;
                self.stretch_remaining = self.behavior.stretch_polls;
            }
        }

        fn edge(&mut self, old: (bool, bool), new: (bool, bool)) {
            if old == new {
                return;
            }
            let (old_sda, old_scl) = old;
            let (new_sda, new_scl) = new;
            if old_scl && new_scl {
                if old_sda && !new_sda {
                    // SDA falling while SCL high: start condition.
                    self.starts += 1;
                    self.slave_sda_low = false;
                    self.state = SlaveState::Address { shift: 0, n: 0 };
                    return;
                }
                if !old_sda && new_sda {
                    // SDA rising while SCL high: stop condition.
                    self.stops += 1;
                    self.slave_sda_low = false;
                    self.state = SlaveState::Idle;
                    return;
                }
            }
            if !old_scl && new_scl {
                self.scl_rising(new_sda);
            } else if old_scl && !new_scl {
                self.scl_falling();
            }
        }

        /// Rising clock edges are where the receiving party samples SDA.
        fn scl_rising(&mut self, sda: bool) {
            match self.state {
                SlaveState::Address { shift, n } => {
                    self.state = SlaveState::Address {
                        shift: (shift << 1) | sda as u8,
                        n: n + 1,
                    };
                }
                SlaveState::Receive { shift, n, index } => {
                    self.state = SlaveState::Receive {
                        shift: (shift << 1) | sda as u8,
                        n: n + 1,
                        index,
                    };
                }
                SlaveState::MasterAck { index, .. } => {
                    self.master_acks.push(!sda);
                    self.state = SlaveState::MasterAck {
                        index,
                        sampled: Some(!sda),
                    };
                }
                _ => {}
            }
        }

        /// Falling clock edges are where the driving party changes SDA for the next bit.
        fn scl_falling(&mut self) {
            match self.state {
                SlaveState::Address { shift, n } if n == 8 => {
                    self.addressed.push(shift);
                    let acked = self.behavior.respond && (shift >> 1) == self.behavior.address;
                    self.slave_sda_low = acked;
                    self.state = SlaveState::AddressAck {
                        acked,
                        read_mode: shift & 1 == 1,
                    };
                }
                SlaveState::AddressAck { acked, read_mode } => {
                    self.slave_sda_low = false;
                    if !acked {
                        self.state = SlaveState::Dead;
                    } else if read_mode {
                        self.begin_stretch();
                        self.present(0, 0);
                    } else {
                        self.begin_stretch();
                        self.state = SlaveState::Receive {
                            shift: 0,
                            n: 0,
                            index: 0,
                        };
                    }
                }
                SlaveState::Receive { shift, n, index } if n == 8 => {
                    self.received.push(shift);
                    let acked = self.behavior.nack_data_at != Some(index);
                    self.slave_sda_low = acked;
                    self.state = SlaveState::DataAck { acked, index };
                }
                SlaveState::DataAck { acked, index } => {
                    self.slave_sda_low = false;
                    self.state = if acked {
                        SlaveState::Receive {
                            shift: 0,
                            n: 0,
                            index: index + 1,
                        }
                    } else {
                        SlaveState::Dead
                    };
                }
                SlaveState::Send { index, bit } => {
                    if bit + 1 < 8 {
                        self.present(index, bit + 1);
                    } else {
                        self.slave_sda_low = false;
                        self.state = SlaveState::MasterAck {
                            index,
                            sampled: None,
                        };
                    }
                }
                SlaveState::MasterAck { sampled, index } => {
                    if sampled == Some(true) {
                        self.present(index + 1, 0);
                    } else {
                        self.slave_sda_low = false;
                        self.state = SlaveState::Dead;
                    }
                }
                _ => {}
            }
        }

        fn present(&mut self, index: usize, bit: u8) {
            let byte = self.behavior.tx.get(index).cloned().unwrap_or(0xFF);
            self.slave_sda_low = byte & (0x80 >> bit) == 0;
            self.state = SlaveState::Send { index, bit };
        }
    }

    /// Handle on a simulated I2C bus. `sda()`/`scl()` hand out line endpoints for the engine
    /// under test; the remaining methods inspect what the slave observed.
    pub struct SimI2cBus(Arc<Mutex<I2cCore>>);

    impl SimI2cBus {
        pub fn new(behavior: SlaveBehavior) -> Self {
            SimI2cBus(Arc::new(Mutex::new(I2cCore {
                master_sda_low: false,
                master_scl_low: false,
                slave_sda_low: false,
                slave_scl_low: false,
                stretch_remaining: 0,
                state: SlaveState::Idle,
                behavior,
                starts: 0,
                stops: 0,
                addressed: Vec::new(),
                received: Vec::new(),
                master_acks: Vec::new(),
            })))
        }

        pub fn sda(&self) -> SimSda {
            SimSda(self.0.clone())
        }

        pub fn scl(&self) -> SimScl {
            SimScl(self.0.clone())
        }

        /// Start conditions (including repeated starts) seen on the wire.
        pub fn starts(&self) -> usize {
            self.0.lock().unwrap().starts
        }

        /// Stop conditions seen on the wire.
        pub fn stops(&self) -> usize {
            self.0.lock().unwrap().stops
        }

        /// Raw address bytes (including the R/W bit) clocked in.
        pub fn addressed(&self) -> Vec<u8> {
            self.0.lock().unwrap().addressed.clone()
        }

        /// Data bytes the slave received in write direction.
        pub fn received(&self) -> Vec<u8> {
            self.0.lock().unwrap().received.clone()
        }

        /// The ACK (`true`) / NACK (`false`) bits the master sent back in read direction.
        pub fn master_acks(&self) -> Vec<bool> {
            self.0.lock().unwrap().master_acks.clone()
        }

        /// Whether the master has let go of both lines.
        pub fn master_released(&self) -> bool {
            let core = self.0.lock().unwrap();
            !core.master_sda_low && !core.master_scl_low
        }

        /// Whether both wires are electrically high.
        pub fn bus_idle(&self) -> bool {
            let core = self.0.lock().unwrap();
            core.sda() && core.scl()
        }
    }

    pub struct SimSda(Arc<Mutex<I2cCore>>);

    impl OpenDrainPin for SimSda {
        type Error = Infallible;
        fn release(&mut self) -> Result<(), Infallible> {
            self.0.lock().unwrap().set_master_sda(false);
            Ok(())
        }
        fn assert_low(&mut self) -> Result<(), Infallible> {
            self.0.lock().unwrap().set_master_sda(true);
            Ok(())
        }
        fn is_high(&mut self) -> Result<bool, Infallible> {
            let core = self.0.lock().unwrap();
            Ok(core.sda())
        }
    }

    pub struct SimScl(Arc<Mutex<I2cCore>>);

    impl OpenDrainPin for SimScl {
        type Error = Infallible;
        fn release(&mut self) -> Result<(), Infallible> {
            self.0.lock().unwrap().set_master_scl(false);
            Ok(())
        }
        fn assert_low(&mut self) -> Result<(), Infallible> {
            self.0.lock().unwrap().set_master_scl(true);
            Ok(())
        }
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.0.lock().unwrap().read_scl())
        }
    }

    /// A delay provider that only counts what was asked of it.
    pub struct SimDelay(Arc<Mutex<u32>>);

    impl SimDelay {
        pub fn new() -> Self {
            SimDelay(Arc::new(Mutex::new(0)))
        }

        pub fn split(&self) -> Self {
            SimDelay(self.0.clone())
        }

        pub fn total_us(&self) -> u32 {
            *self.0.lock().unwrap()
        }
    }

    impl DelayUs<u32> for SimDelay {
        fn delay_us(&mut self, us: u32) {
            *self.0.lock().unwrap() += us;
        }
    }

    /// Everything observable on the simulated SPI wires, in the order it happened. Write events
    /// are recorded even when they do not change the level, so tests can check exact sequencing.
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub enum SpiEvent {
        Cs(bool),
        Clock(bool),
        Mosi(bool),
        /// The master sampled MISO and saw this bit.
        Sample(bool),
    }

    struct SpiCore {
        cs_active_high: bool,
        cs_level: bool,
        sck_level: bool,
        miso_bits: Vec<bool>,
        cursor: usize,
        events: Vec<SpiEvent>,
    }

    impl SpiCore {
        fn selected(&self) -> bool {
            self.cs_level == self.cs_active_high
        }

        fn write_cs(&mut self, level: bool) {
            let was_selected = self.selected();
            self.cs_level = level;
            if !was_selected && self.selected() {
                // Chip-select assertion reloads the slave's shift register.
                self.cursor = 0;
            }
            self.events.push(SpiEvent::Cs(level));
        }

        fn write_sck(&mut self, level: bool) {
            self.sck_level = level;
            self.events.push(SpiEvent::Clock(level));
        }

        fn write_mosi(&mut self, level: bool) {
            self.events.push(SpiEvent::Mosi(level));
        }

        fn read_miso(&mut self) -> bool {
            if !self.selected() {
                return true;
            }
            let bit = self.miso_bits.get(self.cursor).cloned().unwrap_or(true);
            self.cursor += 1;
            self.events.push(SpiEvent::Sample(bit));
            bit
        }
    }

    /// Handle on a set of simulated SPI wires with a passive slave that shifts out `miso` while
    /// selected.
    pub struct SimSpiBus(Arc<Mutex<SpiCore>>);

    impl SimSpiBus {
        pub fn new(cs_active_high: bool, miso: &[u8]) -> Self {
            let miso_bits = miso
                .iter()
                .flat_map(|&byte| (0..8).map(move |bit| byte & (0x80 >> bit) != 0))
                .collect();
            SimSpiBus(Arc::new(Mutex::new(SpiCore {
                cs_active_high,
                cs_level: !cs_active_high,
                sck_level: false,
                miso_bits,
                cursor: 0,
                events: Vec::new(),
            })))
        }

        pub fn cs(&self) -> SimCs {
            SimCs(self.0.clone())
        }

        pub fn mosi(&self) -> SimMosi {
            SimMosi(self.0.clone())
        }

        pub fn miso(&self) -> SimMiso {
            SimMiso(self.0.clone())
        }

        pub fn sck(&self) -> SimSck {
            SimSck(self.0.clone())
        }

        pub fn events(&self) -> Vec<SpiEvent> {
            self.0.lock().unwrap().events.clone()
        }

        pub fn cs_level(&self) -> bool {
            self.0.lock().unwrap().cs_level
        }

        pub fn sck_level(&self) -> bool {
            self.0.lock().unwrap().sck_level
        }

        /// Reconstruct the bytes shifted out on MOSI: the output level in effect at each MISO
        /// sample, MSB first.
        pub fn mosi_bytes(&self) -> Vec<u8> {
            let core = self.0.lock().unwrap();
            let mut mosi = false;
            let mut bits = Vec::new();
            for event in core.events.iter() {
                match *event {
                    SpiEvent::Mosi(level) => mosi = level,
                    SpiEvent::Sample(_) => bits.push(mosi),
                    _ => {}
                }
            }
            bits.chunks(8)
                .map(|chunk| chunk.iter().fold(0u8, |byte, &bit| (byte << 1) | bit as u8))
                .collect()
        }

        /// The clock level in effect at each MISO sample, in order.
        pub fn clock_at_samples(&self) -> Vec<bool> {
            let core = self.0.lock().unwrap();
            let mut sck = false;
            let mut levels = Vec::new();
            for event in core.events.iter() {
                match *event {
                    SpiEvent::Clock(level) => sck = level,
                    SpiEvent::Sample(_) => levels.push(sck),
                    _ => {}
                }
            }
            levels
        }
    }

    pub struct SimCs(Arc<Mutex<SpiCore>>);

    impl OutputPin for SimCs {
        type Error = Infallible;
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.lock().unwrap().write_cs(true);
            Ok(())
        }
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.lock().unwrap().write_cs(false);
            Ok(())
        }
    }

    pub struct SimMosi(Arc<Mutex<SpiCore>>);

    impl OutputPin for SimMosi {
        type Error = Infallible;
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.lock().unwrap().write_mosi(true);
            Ok(())
        }
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.lock().unwrap().write_mosi(false);
            Ok(())
        }
    }

    pub struct SimSck(Arc<Mutex<SpiCore>>);

    impl OutputPin for SimSck {
        type Error = Infallible;
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.lock().unwrap().write_sck(true);
            Ok(())
        }
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.lock().unwrap().write_sck(false);
            Ok(())
        }
    }

    pub struct SimMiso(Arc<Mutex<SpiCore>>);

    impl InputPin for SimMiso {
        type Error = Infallible;
        fn is_high(&self) -> Result<bool, Infallible> {
            Ok(self.0.lock().unwrap().read_miso())
        }
        fn is_low(&self) -> Result<bool, Infallible> {
            self.is_high().map(|level| !level)
        }
    }
}
