use dotenv::dotenv;
use log::{debug, info};
use pisign_gpio::GpioDriver;
use pisign_gpio::gpiod::GpiodDriver;
use pisign_gpio::lcd::hd44780::driver::{GpioHD44780Driver, HD44780Driver};
use pisign_gpio::raw::RawGpioDriver;
use pisign_gpio::sim::SimGpioDriver;
use std::env::var;
use std::thread::sleep;
use std::time::Duration;
use sysinfo::System;

struct SignConfig {
    pin_e: usize,
    pin_rw: usize,
    pin_rs: usize,
    data_pins: [usize; 4],
    led_pin: usize,
    line_0: String,
    line_1: String,
}

fn var_or(name: &str, default: &str) -> String {
    var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_pin_bus(pin_str: &str) -> eyre::Result<[usize; 4]> {
    pin_str
        .split([',', ' ', ';'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse())
        .collect::<Result<Vec<_>, _>>()?
        .try_into()
        .map_err(|_| eyre::eyre!("Invalid number of data pins"))
}

fn main() -> eyre::Result<()> {
    dotenv().ok();
    pretty_env_logger::init();

    const UNKNOWN_STR: &str = "???";

    info!(
        "pisign starting on {}",
        System::host_name().as_deref().unwrap_or(UNKNOWN_STR)
    );
    info!(
        "System ver {} kernel ver {}",
        System::long_os_version().as_deref().unwrap_or(UNKNOWN_STR),
        System::kernel_version().as_deref().unwrap_or(UNKNOWN_STR),
    );
    info!("Architecture {}", System::cpu_arch());

    let config = SignConfig {
        pin_e: var_or("PISIGN_LCD_PIN_E", "17").parse()?,
        pin_rw: var_or("PISIGN_LCD_PIN_RW", "27").parse()?,
        pin_rs: var_or("PISIGN_LCD_PIN_RS", "22").parse()?,
        data_pins: parse_pin_bus(&var_or("PISIGN_LCD_PINS_DATA", "26,16,20,21"))?,
        led_pin: var_or("PISIGN_LED_PIN", "24").parse()?,
        line_0: var_or("PISIGN_LINE_0", "pisign v0.1"),
        line_1: var_or("PISIGN_LINE_1", "hello from a Pi"),
    };

    info!(
        "LCD @ E: {}, RW: {}, RS: {}, Data: {:?}; LED @ {}",
        config.pin_e, config.pin_rw, config.pin_rs, config.data_pins, config.led_pin
    );

    let backend = var_or("PISIGN_GPIO_BACKEND", "gpiomem");
    debug!("Initializing {} GPIO backend...", backend);

    match backend.as_str() {
        "gpiomem" => run(&RawGpioDriver::new_gpiomem()?, &config),
        "mem" => run(&RawGpioDriver::new_mem()?, &config),
        "gpiod" => run(
            &GpiodDriver::open(&var_or("PISIGN_GPIOD_CHIP", "/dev/gpiochip0"))?,
            &config,
        ),
        "sim" => run(&SimGpioDriver::new(58), &config),
        other => Err(eyre::eyre!("Unknown GPIO backend: {other}")),
    }
}

fn run(gpio: &impl GpioDriver, config: &SignConfig) -> eyre::Result<()> {
    debug!("{:?} initialized.", gpio);

    let mut pin_e = gpio.get_pin(config.pin_e)?;
    let pin_e = pin_e.as_output()?;
    let mut pin_rw = gpio.get_pin(config.pin_rw)?;
    let pin_rw = pin_rw.as_output()?;
    let mut pin_rs = gpio.get_pin(config.pin_rs)?;
    let pin_rs = pin_rs.as_output()?;
    let mut data_bus = gpio.get_pin_bus(config.data_pins)?;

    debug!("Initializing LCD driver...");
    let mut lcd = GpioHD44780Driver::new_4bit(&*pin_e, &*pin_rw, &*pin_rs, &mut *data_bus);
    lcd.init()?;

    lcd.set_cursor(0, 0)?;
    lcd.write_str(&config.line_0)?;
    lcd.set_cursor(0, 1)?;
    lcd.write_str(&config.line_1)?;

    info!("Sign text written, blinking heartbeat LED");

    let mut led_pin = gpio.get_pin(config.led_pin)?;
    let led = led_pin.as_output()?;
    let mut led_on = false;

    loop {
        led_on = !led_on;
        led.write(led_on)?;
        sleep(Duration::from_millis(500));
    }
}
