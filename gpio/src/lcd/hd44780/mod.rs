//! HD44780 character LCD module.
//!
//! Targets the Hitachi HD44780U instruction set (and the many compatible
//! controllers) in 4-bit interface mode over plain GPIO lines.
pub mod driver;
