#[cfg(any(test, feature = "serial"))]
pub(crate) mod frame;

#[cfg(feature = "serial")]
pub(crate) mod server;

#[cfg(feature = "serial")]
pub use settings::*;

#[cfg(feature = "serial")]
mod settings {
    pub use tokio_serial::{DataBits, FlowControl, Parity, StopBits};

    /// Serial port settings
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub struct SerialSettings {
        /// Baud rate in symbols-per-second
        pub baud_rate: u32,
        /// Number of bits used to represent a character sent on the line
        pub data_bits: DataBits,
        /// The type of signalling to use for controlling data transfer
        pub flow_control: FlowControl,
        /// The type of parity to use for error checking
        pub parity: Parity,
        /// Number of bits to use to signal the end of a character
        pub stop_bits: StopBits,
    }

    impl Default for SerialSettings {
        fn default() -> Self {
            Self {
                baud_rate: 9600,
                data_bits: DataBits::Eight,
                flow_control: FlowControl::None,
                parity: Parity::None,
                stop_bits: StopBits::One,
            }
        }
    }
}

#[cfg(feature = "serial")]
pub(crate) fn open(
    path: &str,
    settings: SerialSettings,
) -> Result<tokio_serial::SerialStream, tokio_serial::Error> {
    use tokio_serial::SerialPortBuilderExt;

    tokio_serial::new(path, settings.baud_rate)
        .data_bits(settings.data_bits)
        .flow_control(settings.flow_control)
        .parity(settings.parity)
        .stop_bits(settings.stop_bits)
        .open_native_async()
}
