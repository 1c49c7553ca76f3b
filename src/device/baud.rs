//! Baud rate table
//!
//! Maps numeric rates onto the `B*` constants the host knows. Rates outside
//! the table are only accepted where the kernel can program an arbitrary
//! divisor (`termios2` with `BOTHER` on Linux).

use nix::sys::termios::BaudRate;

use crate::error::ConfigError;

/// A validated line speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    /// One of the host's `B*` rates
    Standard(u32),
    /// Arbitrary rate set through the custom-rate ioctl
    Custom(u32),
}

impl Speed {
    pub fn rate(self) -> u32 {
        match self {
            Speed::Standard(rate) | Speed::Custom(rate) => rate,
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const STANDARD_RATES: &[u32] = &[
    0, 50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400,
];

#[cfg(any(target_os = "linux", target_os = "android"))]
pub const STANDARD_RATES: &[u32] = &[
    0, 50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400, 460800, 500000, 576000, 921600, 1000000, 1152000, 1500000, 2000000, 2500000,
    3000000, 3500000, 4000000,
];

/// Whether this host can program rates outside `STANDARD_RATES`
pub const fn custom_rates_supported() -> bool {
    cfg!(target_os = "linux")
}

/// Validate a numeric rate for this host
pub fn resolve(rate: u32) -> Result<Speed, ConfigError> {
    if STANDARD_RATES.contains(&rate) {
        Ok(Speed::Standard(rate))
    } else if custom_rates_supported() && rate > 0 {
        Ok(Speed::Custom(rate))
    } else {
        Err(ConfigError::InvalidBaudRate(rate))
    }
}

/// The `B*` constant for a standard rate
pub(crate) fn baud_rate(rate: u32) -> Option<BaudRate> {
    let baud = match rate {
        0 => BaudRate::B0,
        50 => BaudRate::B50,
        75 => BaudRate::B75,
        110 => BaudRate::B110,
        134 => BaudRate::B134,
        150 => BaudRate::B150,
        200 => BaudRate::B200,
        300 => BaudRate::B300,
        600 => BaudRate::B600,
        1200 => BaudRate::B1200,
        1800 => BaudRate::B1800,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        460800 => BaudRate::B460800,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        500000 => BaudRate::B500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        576000 => BaudRate::B576000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        921600 => BaudRate::B921600,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1000000 => BaudRate::B1000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1152000 => BaudRate::B1152000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1500000 => BaudRate::B1500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        2000000 => BaudRate::B2000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        2500000 => BaudRate::B2500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        3000000 => BaudRate::B3000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        3500000 => BaudRate::B3500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        4000000 => BaudRate::B4000000,
        _ => return None,
    };
    Some(baud)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_rates_have_constants() {
        for &rate in STANDARD_RATES {
            assert!(baud_rate(rate).is_some(), "no constant for {}", rate);
        }
    }

    #[test]
    fn test_resolve_standard() {
        assert_eq!(resolve(9600).unwrap(), Speed::Standard(9600));
        assert_eq!(resolve(115200).unwrap().rate(), 115200);
    }

    #[test]
    fn test_resolve_custom() {
        let result = resolve(250000);
        if custom_rates_supported() {
            assert_eq!(result.unwrap(), Speed::Custom(250000));
        } else {
            assert!(matches!(result, Err(ConfigError::InvalidBaudRate(250000))));
        }
    }
}
