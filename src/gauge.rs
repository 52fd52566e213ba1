//! The gauge itself: owns the drivers and the signal definitions, brings
//! the hardware up, and services CAN receive interrupts.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_can::Id;
use embedded_hal::{delay::DelayNs, spi::SpiDevice};

use crate::{
    codec::{pluck, SigFmt, RECORD_SIZE},
    config::{self, Config, CONTROL_MASK, SIGNALS},
    control::{Control, ControlKind},
    dac::Actuator,
    eeprom::Storage,
    error::Error,
    extended_id, id_from_raw,
    mcp2515::{Filter, FilterHit, Mask, Mcp2515, Mode, RxBuffer},
    Frame, IdKind,
};

/// Pause before resetting after a failed start, so the failure can be
/// observed on a debugger or a scope.
const RESET_DELAY_MS: u32 = 100;

pub struct Gauge<CAN, ROM, A> {
    can: Mcp2515<CAN>,
    rom: ROM,
    actuator: A,
    config: Config,
    signals: [SigFmt; SIGNALS],
}

impl<CAN, ROM, A> Gauge<CAN, ROM, A>
where
    CAN: SpiDevice,
    ROM: Storage,
    A: Actuator,
{
    /// The EEPROM is expected to be initialised already. Nothing touches the
    /// hardware until [`Gauge::start`].
    pub fn new(can: Mcp2515<CAN>, rom: ROM, actuator: A, config: Config) -> Self {
        Self {
            can,
            rom,
            actuator,
            config,
            signals: [SigFmt::UNDEFINED; SIGNALS],
        }
    }

    pub fn release(self) -> (Mcp2515<CAN>, ROM, A) {
        (self.can, self.rom, self.actuator)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The definition held in `slot`, defined or not.
    pub fn signal(&self, slot: u8) -> Option<&SigFmt> {
        self.signals.get(usize::from(slot))
    }

    /// Reads every signal definition from EEPROM into RAM.
    pub fn load_signals(&mut self) -> Result<(), Error> {
        for (slot, sig) in self.signals.iter_mut().enumerate() {
            let mut bytes = [0u8; RECORD_SIZE];
            self.rom.read(config::signal_addr(slot as u8), &mut bytes)?;
            *sig = SigFmt::from_bytes(&bytes);
        }

        let defined = self.signals.iter().filter(|sig| sig.is_defined()).count();
        debug!("gauge: {} of {} signals defined", defined, SIGNALS);
        Ok(())
    }

    /// Loads the signal definitions, then brings the CAN controller up:
    /// receive buffer 0 takes Table Control (filter 0) and Signal Control
    /// (filter 1) frames, receive buffer 1 takes everything else.
    pub fn start(&mut self, delay: &mut impl DelayNs) -> Result<(), Error> {
        self.can.init(delay)?;
        self.load_signals()?;

        let can = &mut self.can;
        can.set_bitrate(self.config.bitrate)?;

        can.set_mask(Mask::Rxm0, Id::Extended(extended_id(CONTROL_MASK)))?;
        can.set_filter(Filter::Rxf0, Id::Extended(self.config.table_control))?;
        can.set_filter(Filter::Rxf1, Id::Extended(self.config.signal_control))?;

        // An all-zero mask passes any identifier, but each filter still only
        // matches its own identifier kind.
        can.set_mask(Mask::Rxm1, id_from_raw(IdKind::Standard, 0))?;
        for (filter, kind) in [
            (Filter::Rxf2, IdKind::Standard),
            (Filter::Rxf3, IdKind::Extended),
            (Filter::Rxf4, IdKind::Standard),
            (Filter::Rxf5, IdKind::Extended),
        ] {
            can.set_filter(filter, id_from_raw(kind, 0))?;
        }

        can.set_interrupts(true)?;
        can.set_mode(Mode::Normal)?;

        info!("gauge: listening at {}", self.config.bitrate);
        Ok(())
    }

    /// [`Gauge::start`], resetting the device through `reset` after a short
    /// delay if it fails.
    pub fn start_or_reset(&mut self, delay: &mut impl DelayNs, reset: fn() -> !) {
        if let Err(e) = self.start(delay) {
            error!("gauge: start failed: {}", e);
            delay.delay_ms(RESET_DELAY_MS);
            reset();
        }
    }

    /// Services a receive interrupt from the CAN controller. Frames are
    /// handled until neither receive buffer holds one, since the interrupt
    /// line stays low while either is full. A frame that fails does not stop
    /// the ones behind it; the first failure is returned at the end. Failing
    /// to read the controller returns at once.
    pub fn on_interrupt(&mut self) -> Result<(), Error> {
        let mut status = self.can.rx_status()?;
        if !status.holds(RxBuffer::Rxb0) && !status.holds(RxBuffer::Rxb1) {
            trace!("gauge: spurious interrupt ({=u8:#x})", status.0);
            return Ok(());
        }

        let mut result = Ok(());
        while status.holds(RxBuffer::Rxb0) || status.holds(RxBuffer::Rxb1) {
            let buffer = if status.holds(RxBuffer::Rxb0) {
                RxBuffer::Rxb0
            } else {
                RxBuffer::Rxb1
            };

            let frame = self.can.receive(buffer)?;
            if let Err(e) = self.dispatch(buffer, status.filter_hit(), &frame) {
                result = result.and(Err(e));
            }

            status = self.can.rx_status()?;
        }

        result
    }

    /// Buffer 0 only takes control frames, buffer 1 only signal frames.
    fn dispatch(&mut self, buffer: RxBuffer, hit: FilterHit, frame: &Frame) -> Result<(), Error> {
        match (buffer, hit) {
            (RxBuffer::Rxb0, FilterHit::Filter(Filter::Rxf0)) => {
                self.on_control(ControlKind::Table, frame)
            }
            (RxBuffer::Rxb0, FilterHit::Filter(Filter::Rxf1)) => {
                self.on_control(ControlKind::Signal, frame)
            }
            (RxBuffer::Rxb0, hit) => {
                warn!("gauge: dropping frame from buffer 0 ({})", hit);
                Ok(())
            }
            (RxBuffer::Rxb1, _) => self.on_signal_frame(frame),
        }
    }

    fn on_control(&mut self, kind: ControlKind, frame: &Frame) -> Result<(), Error> {
        let control = Control::from_frame(kind, frame).inspect_err(|e| {
            warn!("gauge: ignoring control frame: {}", e);
        })?;

        match control {
            Control::ReadRow { table, row } => {
                let entry = config::table(table).read_row(&mut self.rom, row)?;
                self.reply(Control::WriteRow { table, row, entry })
            }
            Control::WriteRow { table, row, entry } => {
                config::table(table).write_row(&mut self.rom, row, entry)?;
                Ok(())
            }
            Control::ReadSignal { slot } => {
                let sig = self.signals[usize::from(slot)];
                self.reply(Control::WriteSignal { slot, sig })
            }
            Control::WriteSignal { slot, sig } => {
                self.rom.write(config::signal_addr(slot), &sig.to_bytes())?;
                self.signals[usize::from(slot)] = sig;
                debug!("gauge: signal {} = {}", slot, sig);
                Ok(())
            }
        }
    }

    fn reply(&mut self, control: Control) -> Result<(), Error> {
        self.can.transmit(&control.to_frame(&self.config))?;
        Ok(())
    }

    /// Drives every signal carried by `frame`. A failing signal does not
    /// stop the others; the first failure is returned once all have run.
    fn on_signal_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        let mut result = Ok(());

        for (slot, sig) in self.signals.iter().enumerate() {
            if !sig.is_defined() || sig.id != frame.id() {
                continue;
            }

            let driven = Self::drive(&mut self.rom, &mut self.actuator, slot as u8, sig, frame);
            if let Err(e) = driven {
                warn!("gauge: signal {} failed: {}", slot, e);
                result = result.and(Err(e));
            }
        }

        result
    }

    fn drive(rom: &mut ROM, actuator: &mut A, slot: u8, sig: &SigFmt, frame: &Frame) -> Result<(), Error> {
        let raw = pluck(sig, frame)?;
        let value = config::table(slot).lookup(rom, raw.widen())?;
        actuator.set_channel(slot, value);
        Ok(())
    }
}

/// A value shared between the foreground and an interrupt handler. Every
/// access runs inside a critical section.
pub struct Shared<T> {
    inner: Mutex<RefCell<Option<T>>>,
}

impl<T> Shared<T> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }

    /// Stores `value`, handing back whatever was there before.
    pub fn install(&self, value: T) -> Option<T> {
        critical_section::with(|cs| self.inner.borrow(cs).replace(Some(value)))
    }

    /// Runs `f` on the value, or returns `None` if nothing is installed yet.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        critical_section::with(|cs| self.inner.borrow(cs).borrow_mut().as_mut().map(f))
    }
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Self::new()
    }
}
