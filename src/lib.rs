//! Software (bit-banged) I2C and SPI bus masters driven over plain digital I/O pins.
//!
//! Sometimes the hardware bus controller is already spoken for, wired to the wrong pins, or
//! simply absent. This crate reimplements the two common board-level wire protocols entirely in
//! software, on top of the `embedded-hal` pin traits, so that any two (I2C) or four (SPI) GPIOs
//! can stand in for a missing peripheral:
//!
//! - [`SoftI2c`] is a single-master I2C engine: start/repeated-start/stop conditions, MSB-first
//!   bit transfer with ACK/NACK, 7-bit addressing, and bounded tolerance of slave clock
//!   stretching, over two open-drain lines (SDA, SCL).
//! - [`SoftSpi`] is an SPI master: chip-select framing with configurable setup/hold padding,
//!   clock generation in all four standard modes, and MSB-first full-duplex shifting, over four
//!   push-pull lines (CS, MOSI, MISO, SCLK).
//!
//! Both engines run each transaction synchronously on the calling thread as one uninterruptible
//! bit loop, and both leave their wires released/idle when the call returns, whatever the
//! outcome.
//!
//! # Construction
//!
//! To set up an I2C device:
//!
//! - Use your platform's `embedded-hal` implementation to obtain the two GPIOs wired to the bus,
//!   configured as open-drain outputs with pull-ups (most HALs call this
//!   `into_open_drain_output`), plus a microsecond delay provider.
//! - Wrap each GPIO in [`OpenDrain`] to bind it as an [`OpenDrainPin`], the line capability the
//!   engine drives.
//! - Construct a [`SoftI2c`] with an [`I2cConfig`] naming the slave's 7-bit address. The engine
//!   owns its lines for the lifetime of the device attachment.
//!
//! ```ignore
//! let sda = softbus::OpenDrain::new(gpioa.pa2.into_open_drain_output(&mut gpioa.crl));
//! let scl = softbus::OpenDrain::new(gpioa.pa1.into_open_drain_output(&mut gpioa.crl));
//!
//! let mut sensor = softbus::SoftI2c::new(sda, scl, delay, softbus::I2cConfig::new(0x48));
//! ```
//!
//! # I2C transactions
//!
//! *See [`SoftI2c`].*
//!
//! Every operation is a complete, framed transaction returning a [`Transfer`]: a
//! [`TransferStatus`] plus the count of data bytes that made it across. A slave that does not
//! answer is treated as data rather than an error, and bus scans branch on the status:
//!
//! ```
//! use softbus::{I2cConfig, SoftI2c};
//! # use softbus::line::noop::{NoopDelay, NoopLine};
//!
//! # fn main() -> Result<(), softbus::I2cError<std::convert::Infallible, std::convert::Infallible>> {
//! # let (sda, scl, delay) = (NoopLine, NoopLine, NoopDelay);
//! let mut sensor = SoftI2c::new(sda, scl, delay, I2cConfig::new(0x48));
//!
//! let mut reading = [0u8; 2];
//! let transfer = sensor.write_then_read(&[0x00], &mut reading)?;
//! if transfer.is_success() {
//!     // `reading` now holds the register contents.
//! }
//! # Ok(())
//! # }
//! ```
//!
//! `write_then_read` joins its two phases with a repeated start rather than a stop, which is what
//! register-pointer devices require. A zero-length `write` (or [`SoftI2c::probe`]) performs a
//! bare address cycle to test for a device's presence.
//!
//! The error channel is reserved for real faults: pin errors, wire-level contention
//! ([`i2c::I2cError::ArbitrationLost`]), and a slave that stretches the clock past the configured
//! bound ([`i2c::I2cError::ClockStretchTimeout`]). The stretch bound is this crate's answer to
//! the classic bit-bang hazard of a hung slave pinning SCL low forever; tune it with
//! [`I2cConfig::stretch_timeout_us`].
//!
//! # SPI transfers
//!
//! *See [`SoftSpi`].*
//!
//! SPI has no acknowledgments, so transfers have no status to inspect; the engine offers framed
//! `write`, `read` (shifting `0x00` filler), `write_then_read` (chip select held across the
//! seam), and simultaneous full-duplex `write_and_read`:
//!
//! ```
//! use softbus::{SoftSpi, SpiConfig};
//! # use softbus::line::noop::{NoopDelay, NoopPin};
//! # type E = std::convert::Infallible;
//!
//! # fn main() -> Result<(), softbus::SpiError<E, E, E, E>> {
//! # let (cs, mosi, miso, sck, delay) = (NoopPin, NoopPin, NoopPin, NoopPin, NoopDelay);
//! let config = SpiConfig::new().clock_hz(100_000).cs_hold_time_us(1);
//! let mut flash = SoftSpi::new(cs, mosi, miso, sck, delay, config)?;
//!
//! let mut id = [0u8; 3];
//! flash.write_then_read(&[0x9F], &mut id)?;
//! # Ok(())
//! # }
//! ```
//!
//! `SoftSpi` also implements `embedded_hal::blocking::spi::{Write, Transfer}`, so existing
//! `embedded-hal` device drivers can run over the bit-banged bus unmodified.
//!
//! # Sharing an engine
//!
//! The engines hold no internal lock and are not reentrant; a transaction must run to completion
//! before the next one starts. To reach one engine from several contexts, serialize whole
//! transactions through a [`BusMutex`] (aliased to a sensible default per platform by
//! [`DefaultMutex`]); see the [`mutex`] module. Never split a transaction across lock
//! acquisitions: the bit loops own the wires for the full frame.
//!
//! # Timing and blocking behavior
//!
//! Line toggles are issued back-to-back at whatever rate the pin implementation achieves. The
//! I2C engine inserts delays only while polling a stretched clock; the SPI engine optionally
//! paces its clock toward [`SpiConfig::clock_hz`] and pads chip-select framing by the configured
//! setup/hold times. There is no cancellation point inside a transaction; callers on an async
//! executor should treat each call as occupying its worker for the duration.
//!
//! # Cargo features
//!
//! - `std` (default): use `std`; also makes `DefaultMutex` alias `std::sync::Mutex`.
//! - `unproven` (default): forwards `embedded-hal/unproven`, which that crate requires for
//!   `digital::v2::InputPin`. The SPI engine (MISO is an input) and the [`OpenDrain`] adapter
//!   need it; without it only the core I2C machinery over custom [`OpenDrainPin`] types remains.
//! - `cortexm`: makes `DefaultMutex` alias the `cortex-m` interrupt mutex for bare-metal ARM.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate core;
#[cfg(test)]
extern crate proptest;

#[cfg(feature = "cortexm")]
extern crate cortex_m;
extern crate embedded_hal as hal;

pub mod i2c;
pub mod line;
pub mod mutex;
#[cfg(feature = "unproven")]
pub mod spi;
pub mod transfer;

pub use i2c::{I2cConfig, I2cError, SoftI2c};
#[cfg(feature = "unproven")]
pub use line::OpenDrain;
pub use line::OpenDrainPin;
pub use mutex::{BusMutex, DefaultMutex};
#[cfg(feature = "unproven")]
pub use spi::{SoftSpi, SpiConfig, SpiError};
pub use transfer::{Transfer, TransferStatus};
