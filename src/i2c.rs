//! The bit-banged I2C master engine.
//!
//! [`SoftI2c`] drives a complete single-master I2C link layer (start/repeated-start/stop
//! conditions, MSB-first bit transfer, ACK/NACK, 7-bit addressing) over two [`OpenDrainPin`]
//! lines. The slave address is bound at construction; one engine instance is one logical device
//! attachment.
//!
//! Protocol outcomes (a slave that does not answer, a byte that is refused) are reported as
//! [`TransferStatus`] values, never as errors: a bus scan treats "nobody home" as data. The error
//! channel is reserved for line faults, wire-level contention, and a slave that stretches the
//! clock past the configured bound.
//!
//! Every public operation is a full transaction and leaves the bus idle when it returns, with
//! both lines released and no start condition left open, whatever the outcome was.

use hal::blocking::delay::DelayUs;

use line::OpenDrainPin;
use transfer::{Transfer, TransferStatus};

/// Clock-stretch bound applied when the configuration does not override it.
const DEFAULT_STRETCH_TIMEOUT_US: u32 = 10_000;

/// Interval between SCL polls while waiting out a stretched clock.
const STRETCH_POLL_US: u32 = 1;

fn valid_address(address: u8) -> u8 {
    match address {
        0x00..=0x7F => address,
        _ => panic!("only 7-bit slave addresses are supported"),
    }
}

/// Connection settings for a [`SoftI2c`] engine. Immutable once the engine is constructed.
#[derive(Clone, Copy, Debug)]
pub struct I2cConfig {
    address: u8,
    stretch_timeout_us: u32,
}

impl I2cConfig {
    /// Settings for the slave at the given 7-bit `address`.
    ///
    /// # Panics
    ///
    /// Panics if `address` does not fit in 7 bits. 10-bit addressing is not supported.
    pub fn new(address: u8) -> Self {
        Self {
            address: valid_address(address),
            stretch_timeout_us: DEFAULT_STRETCH_TIMEOUT_US,
        }
    }

    /// Bound the time spent waiting for a slave to release a stretched clock, in microseconds.
    /// A transaction that waits longer fails with [`I2cError::ClockStretchTimeout`]. Defaults to
    /// 10 ms.
    pub fn stretch_timeout_us(mut self, us: u32) -> Self {
        self.stretch_timeout_us = us;
        self
    }
}

/// The union of all errors an I2C transaction may return. The first two variants carry errors
/// thrown by the respective line; the rest are wire-level conditions detected by the engine.
#[derive(Debug, PartialEq)]
pub enum I2cError<SE, CE> {
    /// The SDA line threw an error.
    Sda(SE),
    /// The SCL line threw an error.
    Scl(CE),
    /// SDA did not follow the master's release during a start, a stop, or a transmitted `1` bit.
    /// Another driver is on the bus, or the wiring is faulty.
    ArbitrationLost,
    /// A slave held SCL low longer than the configured stretch timeout.
    ClockStretchTimeout,
}

impl<SE, CE> I2cError<SE, CE> {
    fn from_sda(e: SE) -> Self {
        I2cError::Sda(e)
    }
    fn from_scl(e: CE) -> Self {
        I2cError::Scl(e)
    }
}

/// A bit-banged I2C master bound to one slave address.
///
/// Owns its two lines and a delay provider for the lifetime of the device attachment. The engine
/// is strictly sequential and holds no lock; callers that share one engine between contexts must
/// serialize whole transactions externally (see the `mutex` module).
pub struct SoftI2c<SDA, SCL, D> {
    sda: SDA,
    scl: SCL,
    delay: D,
    write_address: u8,
    read_address: u8,
    /// Whether a start condition has been issued without a matching stop. Repeated starts need
    /// to know.
    started: bool,
    stretch_timeout_us: u32,
}

impl<SDA, SCL, D> SoftI2c<SDA, SCL, D>
where
    SDA: OpenDrainPin,
    SCL: OpenDrainPin,
    D: DelayUs<u32>,
{
    /// Create an engine for the device reachable over `sda`/`scl` at the address in `config`.
    ///
    /// Takes ownership of both lines; they must not be shared with any other engine while this
    /// one exists. No bus activity happens until the first transaction.
    pub fn new(sda: SDA, scl: SCL, delay: D, config: I2cConfig) -> Self {
        Self {
            sda,
            scl,
            delay,
            write_address: config.address << 1,
            read_address: (config.address << 1) | 1,
            started: false,
            stretch_timeout_us: config.stretch_timeout_us,
        }
    }

    /// Perform a complete write transaction: start, address, data bytes, stop.
    ///
    /// An empty `buffer` performs a bare address cycle with an immediate stop, which is how slave
    /// presence is probed.
    pub fn write(&mut self, buffer: &[u8]) -> Result<Transfer, I2cError<SDA::Error, SCL::Error>> {
        let outcome = self.write_frame(buffer, true);
        self.finish(outcome)
    }

    /// Perform a complete read transaction: start, address, data bytes, stop. The master
    /// acknowledges every byte except the last, which it NACKs to end the slave's transmission.
    pub fn read(
        &mut self,
        buffer: &mut [u8],
    ) -> Result<Transfer, I2cError<SDA::Error, SCL::Error>> {
        let outcome = self.read_frame(buffer, true);
        self.finish(outcome)
    }

    /// Write then read in one transaction, joined by a repeated start instead of a stop, so no
    /// other party can interject between the phases. This is the "write a register pointer, read
    /// the value" idiom.
    ///
    /// If the write phase does not fully succeed its outcome is returned and the read phase is
    /// not attempted. On success the byte count covers both phases.
    pub fn write_then_read(
        &mut self,
        write_buffer: &[u8],
        read_buffer: &mut [u8],
    ) -> Result<Transfer, I2cError<SDA::Error, SCL::Error>> {
        let outcome = match self.write_frame(write_buffer, false) {
            Ok(write_phase) if write_phase.is_success() => {
                self.read_frame(read_buffer, true).map(|read_phase| {
                    Transfer::new(read_phase.status, write_phase.bytes + read_phase.bytes)
                })
            }
            other => other,
        };
        self.finish(outcome)
    }

    /// Address the slave with no data bytes and report whether it acknowledged. `false` means no
    /// device answered at the configured address.
    pub fn probe(&mut self) -> Result<bool, I2cError<SDA::Error, SCL::Error>> {
        self.write(&[]).map(|transfer| transfer.is_success())
    }

    /// One write-direction frame: address cycle plus data bytes, started unconditionally. A stop
    /// is attached to the last byte (or to the address cycle itself when `buffer` is empty) only
    /// when `send_stop`.
    fn write_frame(
        &mut self,
        buffer: &[u8],
        send_stop: bool,
    ) -> Result<Transfer, I2cError<SDA::Error, SCL::Error>> {
        if !self.transmit(true, buffer.is_empty() && send_stop, self.write_address)? {
            return Ok(Transfer::new(TransferStatus::AddressNack, 0));
        }
        let mut transferred = 0;
        for (i, &byte) in buffer.iter().enumerate() {
            let stop_here = send_stop && i == buffer.len() - 1;
            if !self.transmit(false, stop_here, byte)? {
                return Ok(Transfer::new(TransferStatus::PartialTransfer, transferred));
            }
            transferred += 1;
        }
        Ok(Transfer::new(TransferStatus::Success, transferred))
    }

    /// One read-direction frame, mirroring `write_frame`. Reception itself cannot be NACKed by
    /// the slave, so a frame that gets past the address cycle always completes.
    fn read_frame(
        &mut self,
        buffer: &mut [u8],
        send_stop: bool,
    ) -> Result<Transfer, I2cError<SDA::Error, SCL::Error>> {
        if !self.transmit(true, buffer.is_empty() && send_stop, self.read_address)? {
            return Ok(Transfer::new(TransferStatus::AddressNack, 0));
        }
        let len = buffer.len();
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = self.receive(i < len - 1, send_stop && i == len - 1)?;
        }
        Ok(Transfer::new(TransferStatus::Success, len))
    }

    /// Clock one byte out MSB-first and read back the ACK bit; returns whether the slave
    /// acknowledged. A requested stop is emitted whether or not it did.
    fn transmit(
        &mut self,
        send_start: bool,
        send_stop: bool,
        byte: u8,
    ) -> Result<bool, I2cError<SDA::Error, SCL::Error>> {
        if send_start {
            self.send_start()?;
        }
        let mut data = byte;
        for _ in 0..8 {
            self.write_bit(data & 0x80 != 0)?;
            data <<= 1;
        }
        let nack = self.read_bit()?;
        if send_stop {
            self.send_stop()?;
        }
        Ok(!nack)
    }

    /// Clock one byte in MSB-first, then send the ACK bit: low to ask for more, high (NACK) on
    /// the caller's final byte.
    fn receive(
        &mut self,
        ack: bool,
        send_stop: bool,
    ) -> Result<u8, I2cError<SDA::Error, SCL::Error>> {
        let mut byte = 0;
        for _ in 0..8 {
            byte = (byte << 1) | self.read_bit()? as u8;
        }
        self.write_bit(!ack)?;
        if send_stop {
            self.send_stop()?;
        }
        Ok(byte)
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), I2cError<SDA::Error, SCL::Error>> {
        if bit {
            self.sda.release().map_err(I2cError::from_sda)?;
        } else {
            self.sda.assert_low().map_err(I2cError::from_sda)?;
        }
        self.wait_for_scl()?;
        if bit && !self.sda.is_high().map_err(I2cError::from_sda)? {
            // We released SDA to transmit a one but the wire stayed low.
            return Err(I2cError::ArbitrationLost);
        }
        self.scl.assert_low().map_err(I2cError::from_scl)
    }

    fn read_bit(&mut self) -> Result<bool, I2cError<SDA::Error, SCL::Error>> {
        self.sda.release().map_err(I2cError::from_sda)?;
        self.wait_for_scl()?;
        let bit = self.sda.is_high().map_err(I2cError::from_sda)?;
        self.scl.assert_low().map_err(I2cError::from_scl)?;
        Ok(bit)
    }

    /// Release SCL and wait for the wire to actually rise. A slave stretching the clock holds it
    /// low; the wait polls through the delay provider and is bounded by the configured timeout.
    fn wait_for_scl(&mut self) -> Result<(), I2cError<SDA::Error, SCL::Error>> {
        self.scl.release().map_err(I2cError::from_scl)?;
        let mut waited_us = 0;
        while !self.scl.is_high().map_err(I2cError::from_scl)? {
            if waited_us >= self.stretch_timeout_us {
                return Err(I2cError::ClockStretchTimeout);
            }
            self.delay.delay_us(STRETCH_POLL_US);
            waited_us += STRETCH_POLL_US;
        }
        Ok(())
    }

    /// Issue a start condition: SDA falls while SCL is high. When a previous start is still open
    /// this first brings SDA back high and lets SCL rise, turning the edge into a repeated start.
    fn send_start(&mut self) -> Result<(), I2cError<SDA::Error, SCL::Error>> {
        if self.started {
            self.sda.release().map_err(I2cError::from_sda)?;
            self.wait_for_scl()?;
        }
        if !self.sda.is_high().map_err(I2cError::from_sda)? {
            return Err(I2cError::ArbitrationLost);
        }
        self.sda.assert_low().map_err(I2cError::from_sda)?;
        self.scl.assert_low().map_err(I2cError::from_scl)?;
        self.started = true;
        Ok(())
    }

    /// Issue a stop condition: SDA rises while SCL is high.
    fn send_stop(&mut self) -> Result<(), I2cError<SDA::Error, SCL::Error>> {
        self.sda.assert_low().map_err(I2cError::from_sda)?;
        self.wait_for_scl()?;
        self.sda.release().map_err(I2cError::from_sda)?;
        self.started = false;
        if !self.sda.is_high().map_err(I2cError::from_sda)? {
            return Err(I2cError::ArbitrationLost);
        }
        Ok(())
    }

    /// Terminal bookkeeping shared by every public operation: if a start is still open a stop
    /// goes out first, then both lines end up released. Failure outcomes pass through here too,
    /// so that any terminal status leaves the bus idle.
    fn finish(
        &mut self,
        outcome: Result<Transfer, I2cError<SDA::Error, SCL::Error>>,
    ) -> Result<Transfer, I2cError<SDA::Error, SCL::Error>> {
        let outcome = outcome.and_then(|transfer| {
            if self.started {
                self.send_stop()?;
            }
            Ok(transfer)
        });
        // Best effort on the error paths; after a clean stop these are no-ops.
        let _ = self.scl.release();
        let _ = self.sda.release();
        self.started = false;
        outcome
    }
}
