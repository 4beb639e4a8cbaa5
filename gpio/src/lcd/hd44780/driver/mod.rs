mod gpio;

use crate::{GpioError, GpioResult};
pub use gpio::*;
use std::fmt::Debug;

/// Selects which of the controller's two registers a transfer targets,
/// via the RS signal.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegisterSelect {
    /// Instruction register (commands, addresses) and busy-flag reads.
    Instruction,
    /// Data register (character codes).
    Data,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CursorDirection {
    /// Moves the cursor to the left after writing/reading data.
    Left,
    /// Moves the cursor to the right after writing/reading data.
    Right,
}

/// DDRAM address offsets of the two display rows.
const ROW_OFFSETS: [u8; 2] = [0x00, 0x40];

pub trait HD44780Driver: Debug {
    /// Initializes the controller for 4-bit, 2-line operation, clears the
    /// display, and leaves the cursor at the home position with increment
    /// entry mode.
    fn init(&mut self) -> GpioResult<()>;

    /// Sends a command byte to the instruction register and blocks until
    /// the controller clears its busy flag.
    fn command(&mut self, command: u8) -> GpioResult<()>;

    /// Sends one byte to the data register and blocks until the controller
    /// clears its busy flag.
    fn write_byte(&mut self, data: u8) -> GpioResult<()>;

    /// Reads the status byte: busy flag in bit 7, address counter in the
    /// low 7 bits.
    fn read_status(&mut self) -> GpioResult<u8>;

    // High-level operations, all built on the synchronous primitives above.

    /// Clears the display and sets the cursor to the home position.
    fn clear_display(&mut self) -> GpioResult<()> {
        self.command(0b00000001)
    }

    /// Sets the cursor to the home position.
    fn return_home(&mut self) -> GpioResult<()> {
        self.command(0b00000010)
    }

    /// Sets the display to the specified entry mode.
    fn set_entry_mode(&mut self, cursor_direction: CursorDirection, shift: bool) -> GpioResult<()> {
        let mut command = 0b00000100;
        if cursor_direction == CursorDirection::Right {
            command |= 0b00000010;
        }
        if shift {
            command |= 0b00000001;
        }
        self.command(command)
    }

    /// Sets the display on/off, cursor on/off, and blinking on/off.
    fn set_display_control(
        &mut self,
        display_on: bool,
        cursor_on: bool,
        blink_on: bool,
    ) -> GpioResult<()> {
        let mut command = 0b00001000;
        if display_on {
            command |= 0b00000100;
        }
        if cursor_on {
            command |= 0b00000010;
        }
        if blink_on {
            command |= 0b00000001;
        }
        self.command(command)
    }

    /// Moves the cursor or shifts the display without touching DDRAM.
    fn cursor_shift(&mut self, display_shift: bool, direction: CursorDirection) -> GpioResult<()> {
        let mut command = 0b00010000;
        if display_shift {
            command |= 0b00001000;
        }
        if direction == CursorDirection::Right {
            command |= 0b00000100;
        }
        self.command(command)
    }

    /// Sets line count and font. The interface width is fixed at 4 bits.
    fn function_set(&mut self, two_lines: bool, tall_font: bool) -> GpioResult<()> {
        let mut command = 0b00100000;
        if two_lines {
            command |= 0b00001000;
        }
        if tall_font {
            command |= 0b00000100;
        }
        self.command(command)
    }

    /// Sets the CGRAM address.
    fn set_cgram_address(&mut self, address: u8) -> GpioResult<()> {
        if address > 0b00111111 {
            return Err(GpioError::InvalidArgument);
        }
        self.command(0b01000000 | address)
    }

    /// Sets the DDRAM address.
    fn set_ddram_address(&mut self, address: u8) -> GpioResult<()> {
        if address > 0b01111111 {
            return Err(GpioError::InvalidArgument);
        }
        self.command(0b10000000 | address)
    }

    /// Moves the cursor to the given column and row.
    ///
    /// A row other than 0 or 1 is clamped to 1. The column is not
    /// range-checked; out-of-range columns land wherever the controller's
    /// address wrap puts them.
    fn set_cursor(&mut self, col: u8, row: u8) -> GpioResult<()> {
        let row = if row > 1 { 1 } else { row };
        let address = col.wrapping_add(ROW_OFFSETS[row as usize]);
        self.command(0b10000000 | address)
    }

    /// Writes the bytes one at a time, in order. Each byte waits for the
    /// controller on its own; there is no batching.
    fn write_buffer(&mut self, bytes: &[u8]) -> GpioResult<()> {
        for &byte in bytes {
            self.write_byte(byte)?;
        }
        Ok(())
    }

    /// Writes the text byte-by-byte as HD44780 character codes. An empty
    /// string writes nothing.
    fn write_str(&mut self, text: &str) -> GpioResult<()> {
        self.write_buffer(text.as_bytes())
    }

    /// Reads the busy flag and address counter.
    fn get_busy_flag_and_address(&mut self) -> GpioResult<(bool, u8)> {
        let status = self.read_status()?;
        let busy_flag = status & 0b10000000 != 0;
        let address = status & 0b01111111;
        Ok((busy_flag, address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records issued commands and data bytes instead of toggling pins.
    #[derive(Debug, Default)]
    struct RecordingDriver {
        commands: Vec<u8>,
        data: Vec<u8>,
    }

    impl HD44780Driver for RecordingDriver {
        fn init(&mut self) -> GpioResult<()> {
            Ok(())
        }

        fn command(&mut self, command: u8) -> GpioResult<()> {
            self.commands.push(command);
            Ok(())
        }

        fn write_byte(&mut self, data: u8) -> GpioResult<()> {
            self.data.push(data);
            Ok(())
        }

        fn read_status(&mut self) -> GpioResult<u8> {
            Ok(0)
        }
    }

    #[test]
    fn set_cursor_row_0_uses_plain_column() {
        let mut lcd = RecordingDriver::default();
        lcd.set_cursor(5, 0).unwrap();
        assert_eq!(lcd.commands, vec![0x80 | 5]);
    }

    #[test]
    fn set_cursor_row_1_adds_row_offset() {
        let mut lcd = RecordingDriver::default();
        lcd.set_cursor(7, 1).unwrap();
        assert_eq!(lcd.commands, vec![0x80 | (0x40 + 7)]);
    }

    #[test]
    fn set_cursor_clamps_bogus_rows_to_1() {
        let mut lcd = RecordingDriver::default();
        lcd.set_cursor(3, 2).unwrap();
        lcd.set_cursor(3, 250).unwrap();
        assert_eq!(lcd.commands, vec![0x80 | (0x40 + 3), 0x80 | (0x40 + 3)]);
    }

    #[test]
    fn set_cursor_does_not_check_the_column() {
        let mut lcd = RecordingDriver::default();
        lcd.set_cursor(0xF0, 1).unwrap();
        // 0xF0 + 0x40 wraps to 0x30 in the u8 address.
        assert_eq!(lcd.commands, vec![0x80 | 0x30]);
    }

    #[test]
    fn entry_mode_encodes_direction_and_shift() {
        let mut lcd = RecordingDriver::default();
        lcd.set_entry_mode(CursorDirection::Right, false).unwrap();
        lcd.set_entry_mode(CursorDirection::Left, true).unwrap();
        assert_eq!(lcd.commands, vec![0b00000110, 0b00000101]);
    }

    #[test]
    fn display_control_encodes_flags() {
        let mut lcd = RecordingDriver::default();
        lcd.set_display_control(true, false, false).unwrap();
        lcd.set_display_control(true, true, true).unwrap();
        assert_eq!(lcd.commands, vec![0b00001100, 0b00001111]);
    }

    #[test]
    fn cursor_shift_encodes_flags() {
        let mut lcd = RecordingDriver::default();
        lcd.cursor_shift(false, CursorDirection::Left).unwrap();
        lcd.cursor_shift(true, CursorDirection::Right).unwrap();
        assert_eq!(lcd.commands, vec![0b00010000, 0b00011100]);
    }

    #[test]
    fn cgram_and_ddram_addresses_are_validated() {
        let mut lcd = RecordingDriver::default();
        assert_eq!(
            lcd.set_cgram_address(0x40),
            Err(GpioError::InvalidArgument)
        );
        assert_eq!(
            lcd.set_ddram_address(0x80),
            Err(GpioError::InvalidArgument)
        );
        lcd.set_cgram_address(0x3F).unwrap();
        lcd.set_ddram_address(0x7F).unwrap();
        assert_eq!(lcd.commands, vec![0b01111111, 0b11111111]);
    }

    #[test]
    fn write_buffer_keeps_byte_order() {
        let mut lcd = RecordingDriver::default();
        lcd.write_buffer(&[0x41, 0x42, 0x43]).unwrap();
        assert_eq!(lcd.data, vec![0x41, 0x42, 0x43]);
    }

    #[test]
    fn empty_writes_are_no_ops() {
        let mut lcd = RecordingDriver::default();
        lcd.write_buffer(&[]).unwrap();
        lcd.write_str("").unwrap();
        assert!(lcd.data.is_empty());
        assert!(lcd.commands.is_empty());
    }

    #[test]
    fn busy_flag_and_address_are_split() {
        #[derive(Debug)]
        struct FixedStatus(u8);
        impl HD44780Driver for FixedStatus {
            fn init(&mut self) -> GpioResult<()> {
                Ok(())
            }
            fn command(&mut self, _command: u8) -> GpioResult<()> {
                Ok(())
            }
            fn write_byte(&mut self, _data: u8) -> GpioResult<()> {
                Ok(())
            }
            fn read_status(&mut self) -> GpioResult<u8> {
                Ok(self.0)
            }
        }

        let mut lcd = FixedStatus(0xB2);
        assert_eq!(lcd.get_busy_flag_and_address().unwrap(), (true, 0x32));
    }
}
