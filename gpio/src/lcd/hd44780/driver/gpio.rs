use crate::lcd::hd44780::driver::{CursorDirection, HD44780Driver, RegisterSelect};
use crate::{GpioBus, GpioError, GpioOutput, GpioResult};
use log::{debug, trace};
use std::thread::sleep;
use std::time::Duration;

/// Minimum Enable pulse width per the HD44780U bus timing characteristics
/// is 230 ns; 1 us leaves margin on any host.
const DEFAULT_ENABLE_PULSE_WIDTH: Duration = Duration::from_micros(1);

// Delays for the initializing-by-instruction sequence (HD44780U datasheet,
// figure 24). The busy flag cannot be polled during this window.
const POWER_ON_WAIT: Duration = Duration::from_millis(15);
const FUNCTION_SET_FIRST_WAIT: Duration = Duration::from_millis(5);
const FUNCTION_SET_RETRY_WAIT: Duration = Duration::from_micros(150);

/// Bit-banged HD44780 driver in 4-bit interface mode.
///
/// Takes the three control lines and the four-line data bus (DB4..DB7,
/// LSb first) as borrowed GPIO capabilities. All operations are
/// synchronous: commands and data writes return once the controller has
/// cleared its busy flag.
#[derive(Debug)]
pub struct GpioHD44780Driver<'a> {
    pin_e: &'a dyn GpioOutput,
    pin_rw: &'a dyn GpioOutput,
    pin_rs: &'a dyn GpioOutput,
    data_bus: &'a mut dyn GpioBus<4>,
    enable_pulse_width: Duration,
    busy_poll_limit: Option<u32>,
}

impl<'a> GpioHD44780Driver<'a> {
    pub fn new_4bit(
        pin_e: &'a dyn GpioOutput,
        pin_rw: &'a dyn GpioOutput,
        pin_rs: &'a dyn GpioOutput,
        data_bus: &'a mut dyn GpioBus<4>,
    ) -> Self {
        GpioHD44780Driver {
            pin_e,
            pin_rw,
            pin_rs,
            data_bus,
            enable_pulse_width: DEFAULT_ENABLE_PULSE_WIDTH,
            busy_poll_limit: None,
        }
    }

    /// Overrides how long the Enable line is held on each edge.
    pub fn with_enable_pulse_width(mut self, width: Duration) -> Self {
        self.enable_pulse_width = width;
        self
    }

    /// Bounds every busy-flag poll loop at `limit` iterations, surfacing
    /// [GpioError::Timeout] instead of spinning forever on a dead display.
    pub fn with_busy_poll_limit(mut self, limit: u32) -> Self {
        self.busy_poll_limit = Some(limit);
        self
    }

    fn pulse_enable(pin_e: &dyn GpioOutput, width: Duration) -> GpioResult<()> {
        pin_e.write(true)?;
        sleep(width);
        pin_e.write(false)?;
        sleep(width);
        Ok(())
    }

    /// Writes RS and RW and drives E low. The data lines are untouched.
    fn set_control_lines(&self, register: RegisterSelect, read: bool) -> GpioResult<()> {
        self.pin_rs.write(register == RegisterSelect::Data)?;
        self.pin_rw.write(read)?;
        self.pin_e.write(false)?;
        Ok(())
    }

    /// Drives one nibble onto the bus and pulses Enable. Fire-and-forget;
    /// the caller is responsible for the controller being ready.
    fn send_nibble(&mut self, nibble: u8, register: RegisterSelect) -> GpioResult<()> {
        trace!("Sending nibble: {:04b}, register: {:?}", nibble, register);

        self.set_control_lines(register, false)?;
        {
            let bus = self.data_bus.as_output()?;
            bus.write_nibble(nibble & 0x0F)?;
        }
        Self::pulse_enable(self.pin_e, self.enable_pulse_width)
    }

    /// Transfers a full byte as two nibbles, high first, as the 4-bit
    /// protocol mandates.
    fn send_byte(&mut self, byte: u8, register: RegisterSelect) -> GpioResult<()> {
        trace!("Sending byte: {:08b}, register: {:?}", byte, register);

        self.send_nibble(byte >> 4, register)?;
        self.send_nibble(byte & 0x0F, register)
    }

    /// Reads the busy flag alone, through a single Enable pulse.
    ///
    /// Usable during the bring-up window while the controller still
    /// expects 8-bit transfers and a full two-nibble status read would
    /// desynchronize it.
    fn read_busy_flag_4bit(&mut self) -> GpioResult<bool> {
        self.set_control_lines(RegisterSelect::Instruction, true)?;

        let nibble = {
            let input = self.data_bus.as_input()?;

            self.pin_e.write(true)?;
            sleep(self.enable_pulse_width);
            let nibble = input.read_nibble()?;
            self.pin_e.write(false)?;
            sleep(self.enable_pulse_width);

            nibble
        };

        // Bus back to output, RW back to write mode.
        self.data_bus.as_output()?;
        self.pin_rw.write(false)?;

        // DB7 is bus line 3.
        Ok(nibble & 0b1000 != 0)
    }

    fn busy_wait(&mut self) -> GpioResult<()> {
        let mut polls = 0u32;
        while self.read_status()? & 0b10000000 != 0 {
            polls += 1;
            if self.busy_poll_limit.is_some_and(|limit| polls >= limit) {
                return Err(GpioError::Timeout);
            }
        }
        Ok(())
    }
}

impl HD44780Driver for GpioHD44780Driver<'_> {
    fn init(&mut self) -> GpioResult<()> {
        debug!("Initializing HD44780, 4-bit interface");

        // All control and data lines as outputs, driven low.
        self.set_control_lines(RegisterSelect::Instruction, false)?;
        {
            let bus = self.data_bus.as_output()?;
            bus.write_nibble(0)?;
        }

        // Power-on stabilization, then force the controller into 8-bit
        // mode three times. The busy flag is not readable in this window,
        // hence fixed waits (datasheet figure 24).
        sleep(POWER_ON_WAIT);
        self.send_nibble(0b0011, RegisterSelect::Instruction)?;
        sleep(FUNCTION_SET_FIRST_WAIT);
        self.send_nibble(0b0011, RegisterSelect::Instruction)?;
        sleep(FUNCTION_SET_RETRY_WAIT);
        self.send_nibble(0b0011, RegisterSelect::Instruction)?;
        sleep(FUNCTION_SET_RETRY_WAIT);

        // Switch to the 4-bit interface. Polling is trusted from here on.
        self.send_nibble(0b0010, RegisterSelect::Instruction)?;
        let mut polls = 0u32;
        while self.read_busy_flag_4bit()? {
            polls += 1;
            if self.busy_poll_limit.is_some_and(|limit| polls >= limit) {
                return Err(GpioError::Timeout);
            }
        }

        // Fixed setup sequence, in this exact order.
        self.function_set(true, false)?;
        self.set_display_control(true, false, false)?;
        self.clear_display()?;
        self.set_entry_mode(CursorDirection::Right, false)?;

        debug!("HD44780 ready");
        Ok(())
    }

    fn command(&mut self, command: u8) -> GpioResult<()> {
        self.send_byte(command, RegisterSelect::Instruction)?;
        self.busy_wait()
    }

    fn write_byte(&mut self, data: u8) -> GpioResult<()> {
        self.send_byte(data, RegisterSelect::Data)?;
        self.busy_wait()
    }

    fn read_status(&mut self) -> GpioResult<u8> {
        self.set_control_lines(RegisterSelect::Instruction, true)?;

        let status = {
            let input = self.data_bus.as_input()?;

            self.pin_e.write(true)?;
            sleep(self.enable_pulse_width);
            let high_nibble = input.read_nibble()?;
            self.pin_e.write(false)?;
            sleep(self.enable_pulse_width);

            self.pin_e.write(true)?;
            sleep(self.enable_pulse_width);
            let low_nibble = input.read_nibble()?;
            self.pin_e.write(false)?;
            sleep(self.enable_pulse_width);

            (high_nibble << 4) | low_nibble
        };

        // Bus back to output, RW back to write mode.
        self.data_bus.as_output()?;
        self.pin_rw.write(false)?;

        trace!("Read status: {:08b}", status);

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpioDriver;
    use crate::sim::{SimEvent, SimGpioDriver};

    const PIN_E: usize = 0;
    const PIN_RW: usize = 1;
    const PIN_RS: usize = 2;
    const DATA_PINS: [usize; 4] = [3, 4, 5, 6];

    fn with_driver<R>(
        limit: Option<u32>,
        f: impl FnOnce(&mut GpioHD44780Driver, &SimGpioDriver) -> R,
    ) -> R {
        let gpio = SimGpioDriver::new(8);
        let mut pin_e = gpio.get_pin(PIN_E).unwrap();
        let pin_e = pin_e.as_output().unwrap();
        let mut pin_rw = gpio.get_pin(PIN_RW).unwrap();
        let pin_rw = pin_rw.as_output().unwrap();
        let mut pin_rs = gpio.get_pin(PIN_RS).unwrap();
        let pin_rs = pin_rs.as_output().unwrap();
        let mut data_bus = gpio.get_pin_bus(DATA_PINS).unwrap();

        let mut driver =
            GpioHD44780Driver::new_4bit(&*pin_e, &*pin_rw, &*pin_rs, &mut *data_bus)
                .with_enable_pulse_width(Duration::ZERO);
        if let Some(limit) = limit {
            driver = driver.with_busy_poll_limit(limit);
        }
        f(&mut driver, &gpio)
    }

    /// Replays the event log and captures `(rs, nibble)` at every Enable
    /// rising edge in write mode. Read pulses (RW high) are skipped.
    fn write_pulses(gpio: &SimGpioDriver) -> Vec<(bool, u8)> {
        let mut levels = [false; 8];
        let mut pulses = Vec::new();
        for event in gpio.events() {
            if let SimEvent::Write { pin, level } = event {
                if pin == PIN_E && level && !levels[PIN_E] && !levels[PIN_RW] {
                    let mut nibble = 0u8;
                    for (i, &data_pin) in DATA_PINS.iter().enumerate() {
                        if levels[data_pin] {
                            nibble |= 1 << i;
                        }
                    }
                    pulses.push((levels[PIN_RS], nibble));
                }
                levels[pin] = level;
            }
        }
        pulses
    }

    /// Pairs up write pulses into `(rs, byte)` transfers.
    fn written_bytes(pulses: &[(bool, u8)]) -> Vec<(bool, u8)> {
        assert_eq!(pulses.len() % 2, 0, "unpaired nibble transfer");
        pulses
            .chunks(2)
            .map(|pair| {
                assert_eq!(pair[0].0, pair[1].0, "RS changed between nibbles");
                (pair[0].0, (pair[0].1 << 4) | pair[1].1)
            })
            .collect()
    }

    #[test]
    fn send_byte_transfers_high_nibble_first() {
        with_driver(None, |lcd, gpio| {
            lcd.send_byte(0x53, RegisterSelect::Instruction).unwrap();
            assert_eq!(write_pulses(gpio), vec![(false, 0x5), (false, 0x3)]);
        });
    }

    #[test]
    fn data_register_transfers_raise_rs() {
        with_driver(None, |lcd, gpio| {
            lcd.write_byte(0xA7).unwrap();
            assert_eq!(write_pulses(gpio), vec![(true, 0xA), (true, 0x7)]);
        });
    }

    #[test]
    fn command_is_a_single_instruction_byte() {
        with_driver(None, |lcd, gpio| {
            lcd.command(0x01).unwrap();
            assert_eq!(written_bytes(&write_pulses(gpio)), vec![(false, 0x01)]);
        });
    }

    #[test]
    fn read_status_reassembles_nibbles() {
        with_driver(None, |lcd, gpio| {
            gpio.queue_bus_read(0b1011);
            gpio.queue_bus_read(0b0010);
            assert_eq!(lcd.read_status().unwrap(), 0xB2);
        });
    }

    #[test]
    fn read_status_restores_bus_direction() {
        use crate::sim::SimDirection;
        with_driver(None, |lcd, gpio| {
            lcd.read_status().unwrap();
            let last_data_direction = gpio
                .events()
                .into_iter()
                .filter_map(|event| match event {
                    SimEvent::Direction { pin, direction } if DATA_PINS.contains(&pin) => {
                        Some(direction)
                    }
                    _ => None,
                })
                .last();
            assert_eq!(last_data_direction, Some(SimDirection::Output));
            assert_eq!(gpio.pin_level(PIN_RW), Some(false));
        });
    }

    #[test]
    fn init_runs_bring_up_then_fixed_sequence() {
        with_driver(None, |lcd, gpio| {
            lcd.init().unwrap();

            let pulses = write_pulses(gpio);
            // Bring-up: three 8-bit function-set nibbles, then the switch
            // to 4-bit mode.
            assert_eq!(
                &pulses[..4],
                &[(false, 0b0011), (false, 0b0011), (false, 0b0011), (false, 0b0010)]
            );
            // Everything after the bring-up is byte-oriented.
            assert_eq!(
                written_bytes(&pulses[4..]),
                vec![(false, 0x28), (false, 0x0C), (false, 0x01), (false, 0x06)]
            );
        });
    }

    #[test]
    fn write_str_sends_character_codes_in_order() {
        with_driver(None, |lcd, gpio| {
            lcd.write_str("Hi!").unwrap();
            assert_eq!(
                written_bytes(&write_pulses(gpio)),
                vec![(true, b'H'), (true, b'i'), (true, b'!')]
            );
        });
    }

    #[test]
    fn empty_str_touches_no_pins() {
        with_driver(None, |lcd, gpio| {
            gpio.clear_events();
            lcd.write_str("").unwrap();
            assert!(gpio.events().is_empty());
        });
    }

    #[test]
    fn empty_buffer_touches_no_pins() {
        with_driver(None, |lcd, gpio| {
            gpio.clear_events();
            lcd.write_buffer(&[]).unwrap();
            assert!(gpio.events().is_empty());
        });
    }

    #[test]
    fn write_buffer_sends_each_byte_separately() {
        with_driver(None, |lcd, gpio| {
            lcd.write_buffer(&[0x10, 0x20, 0x30]).unwrap();
            assert_eq!(
                written_bytes(&write_pulses(gpio)),
                vec![(true, 0x10), (true, 0x20), (true, 0x30)]
            );
        });
    }

    #[test]
    fn set_cursor_issues_ddram_addresses() {
        with_driver(None, |lcd, gpio| {
            lcd.set_cursor(3, 0).unwrap();
            lcd.set_cursor(3, 1).unwrap();
            lcd.set_cursor(3, 2).unwrap();
            assert_eq!(
                written_bytes(&write_pulses(gpio)),
                vec![
                    (false, 0x80 | 3),
                    (false, 0x80 | (0x40 + 3)),
                    (false, 0x80 | (0x40 + 3)),
                ]
            );
        });
    }

    #[test]
    fn busy_display_blocks_until_flag_clears() {
        with_driver(None, |lcd, gpio| {
            // Two busy polls, then ready.
            gpio.queue_bus_read(0b1000);
            gpio.queue_bus_read(0b0000);
            gpio.queue_bus_read(0b1000);
            gpio.queue_bus_read(0b0000);
            gpio.queue_bus_read(0b0000);
            gpio.queue_bus_read(0b0000);
            lcd.command(0x02).unwrap();
        });
    }

    #[test]
    fn bounded_polling_times_out_on_a_stuck_display() {
        with_driver(Some(3), |lcd, gpio| {
            // Three polls' worth of busy status.
            for _ in 0..3 {
                gpio.queue_bus_read(0b1000);
                gpio.queue_bus_read(0b0000);
            }
            assert_eq!(lcd.command(0x01), Err(GpioError::Timeout));
        });
    }
}
