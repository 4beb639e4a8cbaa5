//! Simulated GPIO backend.
//!
//! Keeps no hardware state: every direction change, write, and read is
//! appended to an event log that tests (or a dry run of the demo binary)
//! can inspect afterwards. Bus reads are served from a scripted queue of
//! values; unscripted reads see driven levels on output lines and low on
//! floating inputs.
use crate::{
    GpioBus, GpioBusInput, GpioBusOutput, GpioDriver, GpioError, GpioInput, GpioOutput, GpioPin,
    GpioResult,
};
use log::trace;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SimDirection {
    Input,
    Output,
}

/// One entry of the recorded pin-state history.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SimEvent {
    Direction { pin: usize, direction: SimDirection },
    Write { pin: usize, level: bool },
    Read { pin: usize, level: bool },
}

struct SimState {
    levels: Vec<bool>,
    directions: Vec<SimDirection>,
    used: Vec<bool>,
    events: Vec<SimEvent>,
    scripted_reads: VecDeque<u8>,
}

pub struct SimGpioDriver {
    state: RefCell<SimState>,
}

impl SimGpioDriver {
    pub fn new(pin_count: usize) -> Self {
        SimGpioDriver {
            state: RefCell::new(SimState {
                levels: vec![false; pin_count],
                directions: vec![SimDirection::Input; pin_count],
                used: vec![false; pin_count],
                events: Vec::new(),
                scripted_reads: VecDeque::new(),
            }),
        }
    }

    /// Queues a value for the next bus read, LSb first over the bus lines.
    ///
    /// Values are consumed one per bus read. Single-pin reads and reads
    /// past the end of the queue see driven levels on output lines and
    /// low on floating inputs.
    pub fn queue_bus_read(&self, value: u8) {
        self.state.borrow_mut().scripted_reads.push_back(value);
    }

    /// Returns a copy of the recorded event history.
    pub fn events(&self) -> Vec<SimEvent> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    /// Last driven level of the pin, `None` if out of range.
    pub fn pin_level(&self, pin: usize) -> Option<bool> {
        self.state.borrow().levels.get(pin).copied()
    }

    fn set_direction(&self, pin: usize, direction: SimDirection) {
        let mut state = self.state.borrow_mut();
        state.directions[pin] = direction;
        state.events.push(SimEvent::Direction { pin, direction });
    }

    fn write_pin(&self, pin: usize, level: bool) {
        trace!("sim: pin {} <- {}", pin, level);
        let mut state = self.state.borrow_mut();
        state.levels[pin] = level;
        state.events.push(SimEvent::Write { pin, level });
    }

    /// Output lines read back what they drive; floating inputs read low.
    fn unscripted_level(state: &SimState, pin: usize) -> bool {
        match state.directions[pin] {
            SimDirection::Output => state.levels[pin],
            SimDirection::Input => false,
        }
    }

    fn read_pin(&self, pin: usize) -> bool {
        let mut state = self.state.borrow_mut();
        let level = Self::unscripted_level(&state, pin);
        state.events.push(SimEvent::Read { pin, level });
        level
    }

    fn read_bus<const N: usize>(&self, pins: &[usize; N]) -> [bool; N] {
        let mut state = self.state.borrow_mut();
        let scripted = state.scripted_reads.pop_front();
        let mut values = [false; N];
        for (i, &pin) in pins.iter().enumerate() {
            values[i] = match scripted {
                Some(value) => value & (1 << i) != 0,
                None => Self::unscripted_level(&state, pin),
            };
            state.events.push(SimEvent::Read {
                pin,
                level: values[i],
            });
        }
        values
    }
}

impl Debug for SimGpioDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimGpioDriver({})", self.state.borrow().levels.len())
    }
}

impl GpioDriver for SimGpioDriver {
    fn count(&self) -> GpioResult<usize> {
        Ok(self.state.borrow().levels.len())
    }

    fn get_pin(&self, index: usize) -> GpioResult<Box<dyn GpioPin + '_>> {
        if index >= self.count()? {
            return Err(GpioError::InvalidArgument);
        }

        let mut state = self.state.borrow_mut();
        if state.used[index] {
            return Err(GpioError::AlreadyInUse);
        }
        state.used[index] = true;

        Ok(Box::new(SimGpioPin {
            driver: self,
            pin_index: index,
        }))
    }

    fn get_pin_bus<const N: usize>(
        &self,
        indices: [usize; N],
    ) -> GpioResult<Box<dyn GpioBus<N> + '_>> {
        let n = self.count()?;

        if indices.iter().any(|&index| index >= n) {
            return Err(GpioError::InvalidArgument);
        }

        let mut state = self.state.borrow_mut();
        if indices.iter().any(|&index| state.used[index]) {
            return Err(GpioError::AlreadyInUse);
        }
        for &index in &indices {
            state.used[index] = true;
        }

        Ok(Box::new(SimGpioBus {
            driver: self,
            pin_indices: indices,
        }))
    }
}

struct SimGpioPin<'a> {
    driver: &'a SimGpioDriver,
    pin_index: usize,
}

impl Debug for SimGpioPin<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}]", self.driver, self.pin_index)
    }
}

impl GpioPin for SimGpioPin<'_> {
    fn as_input(&mut self) -> GpioResult<Box<dyn GpioInput + '_>> {
        self.driver.set_direction(self.pin_index, SimDirection::Input);
        Ok(Box::new(SimGpioInput { pin: self }))
    }

    fn as_output(&mut self) -> GpioResult<Box<dyn GpioOutput + '_>> {
        self.driver.set_direction(self.pin_index, SimDirection::Output);
        Ok(Box::new(SimGpioOutput { pin: self }))
    }
}

impl Drop for SimGpioPin<'_> {
    fn drop(&mut self) {
        self.driver.state.borrow_mut().used[self.pin_index] = false;
    }
}

struct SimGpioInput<'a> {
    pin: &'a SimGpioPin<'a>,
}

impl Debug for SimGpioInput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[input]", self.pin)
    }
}

impl GpioInput for SimGpioInput<'_> {
    fn read(&self) -> GpioResult<bool> {
        Ok(self.pin.driver.read_pin(self.pin.pin_index))
    }
}

struct SimGpioOutput<'a> {
    pin: &'a SimGpioPin<'a>,
}

impl Debug for SimGpioOutput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[output]", self.pin)
    }
}

impl GpioOutput for SimGpioOutput<'_> {
    fn write(&self, value: bool) -> GpioResult<()> {
        self.pin.driver.write_pin(self.pin.pin_index, value);
        Ok(())
    }
}

struct SimGpioBus<'a, const N: usize> {
    driver: &'a SimGpioDriver,
    pin_indices: [usize; N],
}

impl<const N: usize> Debug for SimGpioBus<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{:?}", self.driver, self.pin_indices)
    }
}

impl<const N: usize> GpioBus<N> for SimGpioBus<'_, N> {
    fn as_input(&mut self) -> GpioResult<Box<dyn GpioBusInput<N> + '_>> {
        for &pin_index in &self.pin_indices {
            self.driver.set_direction(pin_index, SimDirection::Input);
        }
        Ok(Box::new(SimGpioBusInput { bus: self }))
    }

    fn as_output(&mut self) -> GpioResult<Box<dyn GpioBusOutput<N> + '_>> {
        for &pin_index in &self.pin_indices {
            self.driver.set_direction(pin_index, SimDirection::Output);
        }
        Ok(Box::new(SimGpioBusOutput { bus: self }))
    }
}

impl<const N: usize> Drop for SimGpioBus<'_, N> {
    fn drop(&mut self) {
        let mut state = self.driver.state.borrow_mut();
        for &pin_index in &self.pin_indices {
            state.used[pin_index] = false;
        }
    }
}

struct SimGpioBusInput<'a, const N: usize> {
    bus: &'a SimGpioBus<'a, N>,
}

impl<const N: usize> Debug for SimGpioBusInput<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[input]", self.bus)
    }
}

impl<const N: usize> GpioBusInput<N> for SimGpioBusInput<'_, N> {
    fn read(&self) -> GpioResult<[bool; N]> {
        Ok(self.bus.driver.read_bus(&self.bus.pin_indices))
    }
}

struct SimGpioBusOutput<'a, const N: usize> {
    bus: &'a SimGpioBus<'a, N>,
}

impl<const N: usize> Debug for SimGpioBusOutput<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[output]", self.bus)
    }
}

impl<const N: usize> GpioBusOutput<N> for SimGpioBusOutput<'_, N> {
    fn write(&self, values: &[bool; N]) -> GpioResult<()> {
        for (i, &pin_index) in self.bus.pin_indices.iter().enumerate() {
            self.bus.driver.write_pin(pin_index, values[i]);
        }
        Ok(())
    }
}
