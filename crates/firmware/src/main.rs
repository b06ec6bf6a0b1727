//! Yoctocore is [Embassy](https://embassy.dev)-based firmware for a Eurorack control-voltage module which follows a
//! USB-MIDI clock. This build targets the [Nucleo-F767ZI development
//! board](https://www.st.com/en/evaluation-tools/nucleo-f767zi.html), whose two on-chip DAC channels stand in for the
//! module's first two outputs.
//!
//! The real-time logic lives in `yoctocore_lib`; this crate owns the peripherals and the tasks that feed the
//! [`Engine`]: USB-MIDI in, a one-millisecond control loop, pushbuttons and the diagnostic SysEx stream out.

#![no_std]
#![no_main]

#[macro_use]
mod fmt;

mod device;
mod diagnostics;
mod module;

use crate::{device::Device, module::Module};
use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_stm32::{
    Config, bind_interrupts,
    dac::Dac,
    exti::ExtiInput,
    gpio::{Level, Output, Pull, Speed},
    peripherals,
    time::Hertz,
    usb,
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex};
use embassy_time::{Duration, Instant, Ticker, Timer};
use embassy_usb::{
    Builder, UsbDevice,
    class::midi::{MidiClass, Receiver},
    driver::EndpointError,
};
use static_cell::StaticCell;
use yoctocore_lib::{
    configuration::OutputMode,
    engine::{Engine, EngineConfig},
    midi::usb_bursts,
};

#[cfg(feature = "defmt-rtt")]
use defmt_rtt as _;
#[cfg(not(feature = "panic-probe"))]
use panic_halt as _;
#[cfg(feature = "panic-probe")]
use panic_probe as _;

bind_interrupts!(
    #[doc(hidden)]
    struct Irqs {
        OTG_FS => usb::InterruptHandler<peripherals::USB_OTG_FS>;
    }
);

type DeviceAsyncMutex = mutex::Mutex<CriticalSectionRawMutex, Device>;
type UsbDriver = usb::Driver<'static, peripherals::USB_OTG_FS>;

/// Period of the control loop.
const CONTROL_PERIOD: Duration = Duration::from_millis(1);

/// Start of system memory, where the STM32F7's built-in bootloader lives.
const SYSTEM_MEMORY: u32 = 0x1FF0_0000;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing Yoctocore");

    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        // hse: high-speed external clock
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });

        // pll: phase-locked loop, crucial for dividing clock
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL216,
            divp: Some(PllPDiv::DIV2), // 8mhz / 4 * 216 / 2 = 216Mhz
            // USB OTG FS needs 48MHz from the main PLL's Q output
            divq: Some(PllQDiv::DIV9), // 8mhz / 4 * 216 / 9 = 48Mhz
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.mux.clk48sel = mux::Clk48sel::PLL1_Q;
    }
    let p = embassy_stm32::init(config);

    // Create the driver, from the HAL.
    static ENDPOINT_OUT_BUFFER: StaticCell<[u8; 256]> = StaticCell::new();
    let mut config = embassy_stm32::usb::Config::default();

    // The Nucleo's USB port cannot power the board, so the device is self-powered and must detect VBUS.
    config.vbus_detection = true;

    let driver = usb::Driver::new_fs(
        p.USB_OTG_FS,
        Irqs,
        p.PA12,
        p.PA11,
        ENDPOINT_OUT_BUFFER.init([0; 256]),
        config,
    );

    // per https://pid.codes, FOSS projects can apply to be listed under the vendor ID owned by InterBiometrics
    let vendor_id = 0x1209;
    let product_id = 0x0C0E;

    let mut config = embassy_usb::Config::new(vendor_id, product_id);
    config.manufacturer = Some("Yoctocore");
    config.product = Some("Yoctocore");
    config.self_powered = true;
    config.max_power = 0;

    // Create embassy-usb DeviceBuilder using the driver and config.
    // It needs some buffers for building the descriptors.
    static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
    static CONTROL_BUFFER: StaticCell<[u8; 64]> = StaticCell::new();

    let mut builder = Builder::new(
        driver,
        config,
        CONFIG_DESCRIPTOR.init([0; 256]),
        BOS_DESCRIPTOR.init([0; 256]),
        &mut [], // no msos descriptors
        CONTROL_BUFFER.init([0; 64]),
    );

    // Create classes on the builder.
    let class = MidiClass::new(&mut builder, 1, 1, 64);
    let (sender, receiver) = class.split();

    // Build the builder.
    let usb = builder.build();

    // per RM0410, DAC channel 1 outputs on port A, pin 4 and channel 2 on pin 5
    let (dac_ch1, dac_ch2) = Dac::new(p.DAC1, p.DMA1_CH5, p.DMA1_CH6, p.PA4, p.PA5).split();

    // LD1 (green) shows the first output's gate, LD3 (red) the phrase, LD2 (blue) whether outputs follow the clock
    let gate_led = Output::new(p.PB0, Level::Low, Speed::Low);
    let phrase_led = Output::new(p.PB14, Level::Low, Speed::Low);
    let mode_led = Output::new(p.PB7, Level::Low, Speed::Low);

    let now = Instant::now();
    let engine: Engine = Engine::new(EngineConfig::default(), now);
    let module = Module::new(dac_ch1, dac_ch2, gate_led, phrase_led);

    static DEVICE: StaticCell<DeviceAsyncMutex> = StaticCell::new();
    let device = DEVICE.init(mutex::Mutex::new(Device::new(engine, module)));

    unwrap!(spawner.spawn(usb_task(usb)));
    unwrap!(spawner.spawn(midi_task(receiver, device)));
    unwrap!(spawner.spawn(diagnostics::diagnostics_task(sender)));
    unwrap!(spawner.spawn(control_task(device)));
    unwrap!(spawner.spawn(maintenance_task()));

    let division_button = ExtiInput::new(p.PC13, p.EXTI13, Pull::None);
    let mode_toggle = ExtiInput::new(p.PD1, p.EXTI1, Pull::Up);
    unwrap!(spawner.spawn(input_task(division_button, mode_toggle, mode_led, device)));
}

#[embassy_executor::task]
async fn usb_task(mut usb: UsbDevice<'static, UsbDriver>) -> ! {
    usb.run().await
}

#[embassy_executor::task]
async fn midi_task(mut receiver: Receiver<'static, UsbDriver>, device: &'static DeviceAsyncMutex) -> ! {
    loop {
        receiver.wait_connection().await;
        info!("USB connected");
        let _ = process_midi(&mut receiver, device).await;
        info!("USB disconnected");
    }
}

/// Task responsible for advancing the engine once per [`CONTROL_PERIOD`].
///
/// Housekeeping waits a second so the first knob samples and LED frames don't race peripheral start-up.
#[embassy_executor::task]
async fn control_task(device: &'static DeviceAsyncMutex) -> ! {
    let mut ticker = Ticker::every(CONTROL_PERIOD);
    let housekeeping_at = Instant::now() + Duration::from_secs(1);
    let mut housekeeping_started = false;
    loop {
        ticker.next().await;
        let now = Instant::now();
        let mut device = device.lock().await;
        if !housekeeping_started && now >= housekeeping_at {
            info!("Startup complete");
            device.start_housekeeping(now);
            housekeeping_started = true;
        }
        device.tick(now);
    }
}

/// Handles the pushbuttons: the user button cycles the clock division, the toggle switches every output between
/// following its manual target and following the clock.
#[embassy_executor::task]
async fn input_task(
    mut division_button: ExtiInput<'static>,
    mut mode_toggle: ExtiInput<'static>,
    mut mode_led: Output<'static>,
    device: &'static DeviceAsyncMutex,
) -> ! {
    loop {
        match select(
            division_button.wait_for_rising_edge(),
            mode_toggle.wait_for_rising_edge(),
        )
        .await
        {
            Either::First(_) => {
                let division = device.lock().await.cycle_division();
                info!("Clock division is now {}", division);
            }
            Either::Second(_) => {
                let mode = device.lock().await.cycle_mode(Instant::now());
                info!("Outputs are now in {} mode", mode);
                match mode {
                    OutputMode::Manual => mode_led.set_low(),
                    OutputMode::Clock => mode_led.set_high(),
                }
            }
        }
    }
}

/// Task responsible for rebooting into the system bootloader once the host or the maintenance escape asks for it.
#[embassy_executor::task]
async fn maintenance_task() -> ! {
    module::REBOOT.wait().await;
    diagnostics::send_text(format_args!("command=reset"));
    diagnostics::flush().await;
    info!("Jumping to the system bootloader");
    Timer::after_millis(10).await;
    // SAFETY: system memory holds a valid vector table for the built-in bootloader, and nothing else runs once the
    // jump is made.
    unsafe { cortex_m::asm::bootload(SYSTEM_MEMORY as *const u32) }
}

#[doc(hidden)]
struct Disconnected {}

impl From<EndpointError> for Disconnected {
    fn from(val: EndpointError) -> Self {
        match val {
            EndpointError::BufferOverflow => panic!("Buffer overflow"),
            EndpointError::Disabled => Disconnected {},
        }
    }
}

/// Helper function which feeds the MIDI received over USB to the engine, one event packet at a time.
async fn process_midi(
    receiver: &mut Receiver<'static, UsbDriver>,
    device: &'static DeviceAsyncMutex,
) -> Result<(), Disconnected> {
    let mut buf = [0; 64];
    loop {
        let n = receiver.read_packet(&mut buf).await?;
        let now = Instant::now();
        let mut device = device.lock().await;
        for burst in usb_bursts(&buf[..n]) {
            device.receive(burst, now);
        }
    }
}
